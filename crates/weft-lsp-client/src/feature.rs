//! The static registry of capability-driven features.
//!
//! Each [`Feature`] ties an LSP request method to the server capability that
//! advertises it and the host provider it installs. Static capabilities from
//! the `initialize` result and dynamic `client/registerCapability` requests
//! both end up in [`Feature::register`].

use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::request::{
    GotoDefinition, GotoImplementation, GotoTypeDefinition, HoverRequest, References,
    Request as _,
};
use lsp_types::{
    PartialResultParams, ReferenceContext, ReferenceParams, Registration, TextDocumentIdentifier,
    TextDocumentPositionParams, WorkDoneProgressParams,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;
use uuid::Uuid;
use weft_config::DocumentSelector;

use crate::connection::Connection;
use crate::convert::adapt_response;
use crate::dispose::Subscription;
use crate::errors::ClientError;
use crate::host::{Provider, ProviderKind, ProviderRequest, ProviderResponse, ProviderSink};
use crate::selector::scope_document_selector_to_root;
use crate::uri::{Direction, LOCATION_LINK_FIELDS, URI_FIELDS, UriRewriter};

const FEATURE_TARGET: &str = "weft_lsp_client::feature";

/// Where a feature's document selector comes from when registered statically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorPolicy {
    /// Use the configured default selector.
    InheritDefault,
    /// Use the `documentSelector` declared inside the capability object, or
    /// match everything when there is none.
    Declared,
}

/// One capability-driven feature.
#[derive(Debug)]
pub struct Feature {
    /// LSP request method.
    pub method: &'static str,
    /// Field of `ServerCapabilities` advertising the feature.
    pub capability: &'static str,
    /// Host provider installed for the feature.
    pub kind: ProviderKind,
    /// Selector source for static registration.
    pub selector_policy: SelectorPolicy,
    /// Result fields holding URIs.
    pub uri_fields: &'static [&'static str],
}

/// Every supported feature.
pub static FEATURES: &[Feature] = &[
    Feature {
        method: HoverRequest::METHOD,
        capability: "hoverProvider",
        kind: ProviderKind::Hover,
        selector_policy: SelectorPolicy::InheritDefault,
        uri_fields: URI_FIELDS,
    },
    Feature {
        method: GotoDefinition::METHOD,
        capability: "definitionProvider",
        kind: ProviderKind::Definition,
        selector_policy: SelectorPolicy::InheritDefault,
        uri_fields: LOCATION_LINK_FIELDS,
    },
    Feature {
        method: References::METHOD,
        capability: "referencesProvider",
        kind: ProviderKind::References,
        selector_policy: SelectorPolicy::InheritDefault,
        uri_fields: URI_FIELDS,
    },
    Feature {
        method: GotoTypeDefinition::METHOD,
        capability: "typeDefinitionProvider",
        kind: ProviderKind::TypeDefinition,
        selector_policy: SelectorPolicy::Declared,
        uri_fields: LOCATION_LINK_FIELDS,
    },
    Feature {
        method: GotoImplementation::METHOD,
        capability: "implementationProvider",
        kind: ProviderKind::Implementation,
        selector_policy: SelectorPolicy::Declared,
        uri_fields: LOCATION_LINK_FIELDS,
    },
];

/// Looks up the feature for a request method.
#[must_use]
pub fn feature_for(method: &str) -> Option<&'static Feature> {
    FEATURES.iter().find(|feature| feature.method == method)
}

/// Registration options understood by every feature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOptions {
    /// Documents the provider applies to; `None` matches everything.
    #[serde(default)]
    pub document_selector: Option<DocumentSelector>,
}

impl RegisterOptions {
    /// Decodes `registerOptions` from a registration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Codec`] when the options are malformed.
    pub fn from_registration(value: Option<&Value>, method: &str) -> Result<Self, ClientError> {
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(options) => serde_json::from_value(options.clone())
                .map_err(|source| ClientError::codec(method, source)),
        }
    }
}

/// What a feature needs from its session to install a provider.
pub(crate) struct FeatureScope {
    pub(crate) connection: Connection,
    pub(crate) root: Option<Url>,
    pub(crate) rewriter: UriRewriter,
    pub(crate) providers: Arc<dyn ProviderSink>,
}

impl Feature {
    /// Returns the capability value when the server advertises the feature,
    /// either as `true` or as an options object.
    #[must_use]
    pub fn advertised<'a>(&self, capabilities: &'a Value) -> Option<&'a Value> {
        capabilities
            .get(self.capability)
            .filter(|value| matches!(value, Value::Bool(true) | Value::Object(_)))
    }

    /// Derives registration options from a static capability value.
    #[must_use]
    pub fn register_options(
        &self,
        capability: &Value,
        default_selector: &DocumentSelector,
    ) -> RegisterOptions {
        let document_selector = match self.selector_policy {
            SelectorPolicy::InheritDefault => Some(default_selector.clone()),
            SelectorPolicy::Declared => capability
                .get("documentSelector")
                .and_then(|selector| serde_json::from_value(selector.clone()).ok()),
        };
        RegisterOptions { document_selector }
    }

    /// Installs a host provider scoped to the session's root.
    pub(crate) fn register(
        &'static self,
        scope: &FeatureScope,
        options: RegisterOptions,
    ) -> Result<Subscription, ClientError> {
        let selector = scope_document_selector_to_root(
            options.document_selector.as_deref(),
            scope.root.as_ref(),
        )?;
        debug!(
            target: FEATURE_TARGET,
            method = self.method,
            connection = scope.connection.id(),
            selector = ?selector,
            "registering provider"
        );
        let provider = Arc::new(ServerProvider {
            feature: self,
            connection: scope.connection.clone(),
            rewriter: scope.rewriter.clone(),
        });
        Ok(scope
            .providers
            .register_provider(self.kind, selector, provider))
    }

    fn request_params(
        &self,
        document: lsp_types::Uri,
        request: &ProviderRequest,
    ) -> Result<Value, ClientError> {
        let position =
            TextDocumentPositionParams::new(TextDocumentIdentifier::new(document), request.position);
        let encoded = match self.kind {
            ProviderKind::References => serde_json::to_value(ReferenceParams {
                text_document_position: position,
                work_done_progress_params: WorkDoneProgressParams::default(),
                partial_result_params: PartialResultParams::default(),
                context: ReferenceContext {
                    include_declaration: request.include_declaration,
                },
            }),
            _ => serde_json::to_value(position),
        };
        encoded.map_err(|source| ClientError::codec(self.method, source))
    }
}

/// Synthesises registrations for every feature the server advertises in its
/// `initialize` result.
///
/// # Errors
///
/// Returns [`ClientError::Codec`] if registration options fail to serialise.
pub fn static_registrations(
    capabilities: &Value,
    default_selector: &DocumentSelector,
) -> Result<Vec<Registration>, ClientError> {
    FEATURES
        .iter()
        .filter_map(|feature| {
            let capability = feature.advertised(capabilities)?;
            let options = feature.register_options(capability, default_selector);
            Some(
                serde_json::to_value(options)
                    .map(|encoded| Registration {
                        id: Uuid::new_v4().to_string(),
                        method: feature.method.to_owned(),
                        register_options: Some(encoded),
                    })
                    .map_err(|source| ClientError::codec(feature.method, source)),
            )
        })
        .collect()
}

struct ServerProvider {
    feature: &'static Feature,
    connection: Connection,
    rewriter: UriRewriter,
}

#[async_trait]
impl Provider for ServerProvider {
    async fn provide(&self, request: ProviderRequest) -> Result<ProviderResponse, ClientError> {
        let document = self.rewriter.to_protocol(&request.document)?;
        let params = self.feature.request_params(document, &request)?;
        let mut result = self.connection.request(self.feature.method, params).await?;
        self.rewriter
            .rewrite_all(&mut result, Direction::ToClient, self.feature.uri_fields)?;
        adapt_response(self.feature.kind, self.feature.method, result)
    }
}

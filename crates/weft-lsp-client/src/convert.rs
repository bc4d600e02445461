//! Conversions from protocol values into host values.
//!
//! Inputs have already been rewritten into the host namespace, so URIs are
//! parsed as-is.

use lsp_types::{
    Diagnostic, GotoDefinitionResponse, Hover, HoverContents, Location, LocationLink,
    MarkedString,
};
use serde_json::Value;

use crate::errors::{ClientError, ConversionError};
use crate::host::{Decoration, HostHover, HostLocation, ProviderKind, ProviderResponse};
use crate::uri::parse_url;

/// Decodes a provider result and converts it for the host.
pub(crate) fn adapt_response(
    kind: ProviderKind,
    method: &str,
    value: Value,
) -> Result<ProviderResponse, ClientError> {
    match kind {
        ProviderKind::Hover => {
            let hover: Option<Hover> = decode(method, value)?;
            Ok(ProviderResponse::Hover(hover.map(hover_to_host)))
        }
        ProviderKind::References => {
            let locations: Option<Vec<Location>> = decode(method, value)?;
            let locations = locations
                .unwrap_or_default()
                .into_iter()
                .map(location_to_host)
                .collect::<Result<_, _>>()?;
            Ok(ProviderResponse::Locations(locations))
        }
        ProviderKind::Definition | ProviderKind::TypeDefinition | ProviderKind::Implementation => {
            let response: Option<GotoDefinitionResponse> = decode(method, value)?;
            Ok(ProviderResponse::Locations(definition_to_host(response)?))
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|source| ClientError::codec(method, source))
}

/// Folds hover contents into a single markdown string.
pub(crate) fn hover_to_host(hover: Hover) -> HostHover {
    let contents = match hover.contents {
        HoverContents::Scalar(marked) => marked_to_markdown(marked),
        HoverContents::Array(items) => items
            .into_iter()
            .map(marked_to_markdown)
            .collect::<Vec<_>>()
            .join("\n\n"),
        HoverContents::Markup(markup) => markup.value,
    };
    HostHover {
        contents,
        range: hover.range,
    }
}

fn marked_to_markdown(marked: MarkedString) -> String {
    match marked {
        MarkedString::String(text) => text,
        MarkedString::LanguageString(code) => {
            format!("```{}\n{}\n```", code.language, code.value)
        }
    }
}

pub(crate) fn location_to_host(location: Location) -> Result<HostLocation, ConversionError> {
    Ok(HostLocation {
        uri: parse_url(location.uri.as_str())?,
        range: location.range,
    })
}

fn link_to_host(link: LocationLink) -> Result<HostLocation, ConversionError> {
    Ok(HostLocation {
        uri: parse_url(link.target_uri.as_str())?,
        range: link.target_selection_range,
    })
}

/// Flattens every shape a definition-like request may answer with.
pub(crate) fn definition_to_host(
    response: Option<GotoDefinitionResponse>,
) -> Result<Vec<HostLocation>, ConversionError> {
    match response {
        None => Ok(Vec::new()),
        Some(GotoDefinitionResponse::Scalar(location)) => Ok(vec![location_to_host(location)?]),
        Some(GotoDefinitionResponse::Array(locations)) => {
            locations.into_iter().map(location_to_host).collect()
        }
        Some(GotoDefinitionResponse::Link(links)) => links.into_iter().map(link_to_host).collect(),
    }
}

/// Renders a diagnostic as a decoration, prefixing the message with its
/// source when one is given.
pub(crate) fn diagnostic_to_decoration(diagnostic: &Diagnostic) -> Decoration {
    let message = match &diagnostic.source {
        Some(source) => format!("{source}: {}", diagnostic.message),
        None => diagnostic.message.clone(),
    };
    Decoration {
        range: diagnostic.range,
        severity: diagnostic.severity,
        message,
    }
}

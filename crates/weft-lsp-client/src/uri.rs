//! Bidirectional URI rewriting between the host and server namespaces.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;
use url::Url;
use weft_config::UriMapping;

use crate::errors::ConversionError;

/// Conversion applied to a single URI.
pub type UriConverter = Arc<dyn Fn(&Url) -> Result<Url, ConversionError> + Send + Sync>;

/// Field names rewritten inside ordinary payloads.
pub const URI_FIELDS: &[&str] = &["uri"];

/// Field names rewritten inside definition-like results, which may contain
/// `LocationLink` values.
pub const LOCATION_LINK_FIELDS: &[&str] = &["uri", "targetUri"];

/// Direction of a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host namespace to server namespace.
    ToServer,
    /// Server namespace to host namespace.
    ToClient,
}

/// Pair of conversions applied at every protocol boundary.
///
/// For any URI `u` the host can produce, `to_client(to_server(u)) == u` must
/// hold; the defaults are the identity.
#[derive(Clone)]
pub struct UriRewriter {
    to_server: UriConverter,
    to_client: UriConverter,
}

impl UriRewriter {
    /// Rewriter that leaves every URI untouched.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(|uri| Ok(uri.clone()), |uri| Ok(uri.clone()))
    }

    /// Rewriter built from arbitrary conversion functions.
    pub fn new<S, C>(to_server: S, to_client: C) -> Self
    where
        S: Fn(&Url) -> Result<Url, ConversionError> + Send + Sync + 'static,
        C: Fn(&Url) -> Result<Url, ConversionError> + Send + Sync + 'static,
    {
        Self {
            to_server: Arc::new(to_server),
            to_client: Arc::new(to_client),
        }
    }

    /// Rewriter swapping configured prefixes.
    ///
    /// The first mapping whose prefix matches wins. URIs matching no mapping
    /// pass through unchanged.
    #[must_use]
    pub fn from_mappings(mappings: &[UriMapping]) -> Self {
        if mappings.is_empty() {
            return Self::identity();
        }
        let outbound: Arc<[UriMapping]> = mappings.into();
        let inbound = Arc::clone(&outbound);
        Self::new(
            move |uri| {
                swap_prefix(
                    uri,
                    outbound
                        .iter()
                        .map(|mapping| (&mapping.client, &mapping.server)),
                )
            },
            move |uri| {
                swap_prefix(
                    uri,
                    inbound
                        .iter()
                        .map(|mapping| (&mapping.server, &mapping.client)),
                )
            },
        )
    }

    /// Converts a host URI into the server namespace.
    ///
    /// # Errors
    ///
    /// Returns the converter's [`ConversionError`].
    pub fn to_server(&self, uri: &Url) -> Result<Url, ConversionError> {
        (self.to_server)(uri)
    }

    /// Converts a server URI into the host namespace.
    ///
    /// # Errors
    ///
    /// Returns the converter's [`ConversionError`].
    pub fn to_client(&self, uri: &Url) -> Result<Url, ConversionError> {
        (self.to_client)(uri)
    }

    /// Converts a URI in the given direction.
    ///
    /// # Errors
    ///
    /// Returns the converter's [`ConversionError`].
    pub fn convert(&self, uri: &Url, direction: Direction) -> Result<Url, ConversionError> {
        match direction {
            Direction::ToServer => self.to_server(uri),
            Direction::ToClient => self.to_client(uri),
        }
    }

    /// Converts a host URI into an `lsp-types` URI in the server namespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError`] when conversion fails or the result is not
    /// a valid protocol URI.
    pub fn to_protocol(&self, uri: &Url) -> Result<lsp_types::Uri, ConversionError> {
        protocol_uri(&self.to_server(uri)?)
    }

    /// Converts a protocol URI from the server into a host URI.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError`] when the text does not parse or the
    /// converter refuses it.
    pub fn from_protocol(&self, uri: &lsp_types::Uri) -> Result<Url, ConversionError> {
        self.to_client(&parse_url(uri.as_str())?)
    }

    /// Rewrites every string field named in `fields`, at any depth.
    ///
    /// Non-string values under those names are walked like any other value.
    ///
    /// # Errors
    ///
    /// Fails on the first URI that does not parse or convert; the value may
    /// then be partially rewritten.
    pub fn rewrite_all(
        &self,
        value: &mut Value,
        direction: Direction,
        fields: &[&str],
    ) -> Result<(), ConversionError> {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    match child {
                        Value::String(text) if fields.contains(&key.as_str()) => {
                            let rewritten = self.convert(&parse_url(text)?, direction)?;
                            *text = rewritten.into();
                        }
                        _ => self.rewrite_all(child, direction, fields)?,
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.rewrite_all(item, direction, fields)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Default for UriRewriter {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for UriRewriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UriRewriter").finish_non_exhaustive()
    }
}

pub(crate) fn parse_url(text: &str) -> Result<Url, ConversionError> {
    Url::parse(text).map_err(|source| ConversionError::invalid(text, source))
}

pub(crate) fn protocol_uri(url: &Url) -> Result<lsp_types::Uri, ConversionError> {
    lsp_types::Uri::from_str(url.as_str()).map_err(|_| ConversionError::Protocol {
        value: url.to_string(),
    })
}

fn swap_prefix<'a>(
    uri: &Url,
    mut prefixes: impl Iterator<Item = (&'a Url, &'a Url)>,
) -> Result<Url, ConversionError> {
    let text = uri.as_str();
    let Some((to, rest)) =
        prefixes.find_map(|(from, to)| text.strip_prefix(from.as_str()).map(|rest| (to, rest)))
    else {
        return Ok(uri.clone());
    };
    let candidate = format!("{}{rest}", to.as_str());
    parse_url(&candidate)
}

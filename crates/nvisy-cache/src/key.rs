//! Logical to physical key mapping.

/// Separator placed between the configured prefix and the logical key.
pub const KEY_SEPARATOR: char = '-';

/// Maps logical keys to the physical keys sent to the store.
///
/// With no prefix configured both directions are the identity. Otherwise
/// [`encode`](Self::encode) prepends `prefix` and [`KEY_SEPARATOR`], and
/// [`decode`](Self::decode) strips them again.
///
/// Logical keys may contain the separator themselves; only the single leading
/// `prefix-` is ever stripped. A physical key that does not carry the prefix is
/// returned unchanged by `decode`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyNamespace {
    /// Full `prefix` + separator, precomputed.
    head: Option<String>,
}

impl KeyNamespace {
    /// Creates a namespace for the given prefix, `None` meaning no prefix.
    pub fn new(prefix: Option<&str>) -> Self {
        Self {
            head: prefix.map(|prefix| format!("{prefix}{KEY_SEPARATOR}")),
        }
    }

    /// Returns the configured prefix, without the separator.
    pub fn prefix(&self) -> Option<&str> {
        self.head
            .as_deref()
            .map(|head| &head[..head.len() - KEY_SEPARATOR.len_utf8()])
    }

    /// Maps a logical key to its physical form.
    pub fn encode(&self, logical: &str) -> String {
        match &self.head {
            Some(head) => format!("{head}{logical}"),
            None => logical.to_owned(),
        }
    }

    /// Maps a physical key back to its logical form.
    pub fn decode<'a>(&self, physical: &'a str) -> &'a str {
        match &self.head {
            Some(head) => physical.strip_prefix(head.as_str()).unwrap_or(physical),
            None => physical,
        }
    }
}

//! Protocol variant negotiation.

/// Catalog protocol variant a response is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Variant {
    /// OPDS 1.0: no subtitle, rights, facets or item counters.
    Legacy,
    /// OPDS 1.2.
    #[default]
    Current,
}

impl Variant {
    /// Resolve a client hint to a variant. Never fails: anything that is not
    /// an explicit request for the legacy format yields [`Variant::Current`].
    pub fn resolve(hint: Option<&str>) -> Self {
        match hint.map(|h| h.trim().to_ascii_lowercase()).as_deref() {
            Some("1.0" | "1" | "legacy") => Variant::Legacy,
            _ => Variant::Current,
        }
    }

    /// Protocol version string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Legacy => "1.0",
            Variant::Current => "1.2",
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_hints() {
        assert_eq!(Variant::resolve(Some("1.0")), Variant::Legacy);
        assert_eq!(Variant::resolve(Some(" Legacy ")), Variant::Legacy);
        assert_eq!(Variant::resolve(Some("1.2")), Variant::Current);
        assert_eq!(Variant::resolve(Some("2.0")), Variant::Current);
        assert_eq!(Variant::resolve(Some("")), Variant::Current);
        assert_eq!(Variant::resolve(None), Variant::Current);
    }
}

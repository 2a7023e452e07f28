//! Test-type catalog: the fault and stress tests the DUT firmware knows.

use std::collections::BTreeMap;
use std::path::Path;

use super::PlanError;

/// One catalog entry describing a DUT-side test type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDefinition {
    pub id: u32,
    /// Whether the test keeps running until explicitly stopped.
    pub continuous: bool,
    pub description: String,
}

/// Immutable catalog, loaded once before any suite runs.
///
/// Format: one `id continuous-flag description` line per test type.
#[derive(Debug, Clone, Default)]
pub struct TestCatalog {
    types: BTreeMap<u32, TestDefinition>,
}

impl TestCatalog {
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, PlanError> {
        let mut types = BTreeMap::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let malformed = |reason: String| PlanError::MalformedCatalogLine {
                line: idx + 1,
                reason,
            };

            let mut fields = line.splitn(3, char::is_whitespace);
            let id = fields
                .next()
                .ok_or_else(|| malformed("missing test id".to_string()))?;
            let id: u32 = id
                .parse()
                .map_err(|_| malformed(format!("invalid test id '{id}'")))?;
            let flag = fields
                .next()
                .ok_or_else(|| malformed("missing continuous flag".to_string()))?;
            let flag: u32 = flag
                .parse()
                .map_err(|_| malformed(format!("invalid continuous flag '{flag}'")))?;
            let description = fields.next().unwrap_or("").trim().to_string();

            types.insert(
                id,
                TestDefinition {
                    id,
                    continuous: flag != 0,
                    description,
                },
            );
        }
        Ok(Self { types })
    }

    pub fn get(&self, id: u32) -> Option<&TestDefinition> {
        self.types.get(&id)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_catalog_lines() {
        let catalog = TestCatalog::parse(
            "# DUT test types\n1 0 register poke\n2 1 continuous memory scribble\n\n",
        )
        .unwrap();
        assert_eq!(catalog.len(), 2);

        let poke = catalog.get(1).unwrap();
        assert!(!poke.continuous);
        assert_eq!(poke.description, "register poke");

        let scribble = catalog.get(2).unwrap();
        assert!(scribble.continuous);
        assert_eq!(scribble.description, "continuous memory scribble");
    }

    #[test]
    fn missing_flag_rejected() {
        assert!(matches!(
            TestCatalog::parse("3\n"),
            Err(PlanError::MalformedCatalogLine { line: 1, .. })
        ));
    }

    #[test]
    fn bad_id_rejected() {
        assert!(matches!(
            TestCatalog::parse("abc 0 whatever\n"),
            Err(PlanError::MalformedCatalogLine { line: 1, .. })
        ));
    }
}

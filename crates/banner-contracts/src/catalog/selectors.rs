use super::registry::{SizeCatalog, SizeTarget};

pub const NO_SIZE_SELECTED: &str = "Please select at least one size";

/// The sizes a user picked for one platform, in the order they were picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeSelection {
    platform: String,
    names: Vec<String>,
}

impl SizeSelection {
    pub fn new(platform: impl Into<String>, names: impl IntoIterator<Item = String>) -> Self {
        let mut selection = Self {
            platform: platform.into(),
            names: Vec::new(),
        };
        selection.set(names);
        selection
    }

    /// Selection holding the platform's first catalog size.
    pub fn for_platform(catalog: &SizeCatalog, platform: &str) -> Self {
        let names = catalog
            .first_size(platform)
            .map(|size| vec![size.name.clone()])
            .unwrap_or_default();
        Self::new(platform, names)
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|existing| existing == name)
    }

    /// Switching platform resets the selection to that platform's first size.
    pub fn switch_platform(&mut self, catalog: &SizeCatalog, platform: &str) {
        *self = Self::for_platform(catalog, platform);
    }

    pub fn toggle(&mut self, name: &str) {
        if self.contains(name) {
            self.names.retain(|existing| existing != name);
        } else {
            self.names.push(name.to_string());
        }
    }

    pub fn set(&mut self, names: impl IntoIterator<Item = String>) {
        self.names.clear();
        for name in names {
            let trimmed = name.trim();
            if trimmed.is_empty() || self.contains(trimmed) {
                continue;
            }
            self.names.push(trimmed.to_string());
        }
    }

    pub fn resolve(&self, catalog: &SizeCatalog) -> Result<Vec<SizeTarget>, String> {
        if self.names.is_empty() {
            return Err(NO_SIZE_SELECTED.to_string());
        }
        self.names
            .iter()
            .map(|name| {
                catalog.target(&self.platform, name).ok_or_else(|| {
                    format!(
                        "Unknown size '{name}' for platform '{}'.",
                        self.platform
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_adds_and_removes_preserving_order() {
        let mut selection = SizeSelection::new("Facebook", vec!["Square".to_string()]);
        selection.toggle("Story");
        selection.toggle("Landscape");
        selection.toggle("Square");
        assert_eq!(selection.names(), &["Story", "Landscape"]);
    }

    #[test]
    fn switch_platform_resets_to_first_size() {
        let catalog = SizeCatalog::builtin();
        let mut selection = SizeSelection::for_platform(&catalog, "Facebook");
        selection.toggle("Story");
        selection.switch_platform(&catalog, "Google Ads");
        assert_eq!(selection.platform(), "Google Ads");
        assert_eq!(selection.names(), &["Medium Rectangle"]);
    }

    #[test]
    fn resolve_returns_targets_in_selection_order() {
        let catalog = SizeCatalog::builtin();
        let selection = SizeSelection::new(
            "Facebook",
            vec!["Story".to_string(), "Square".to_string(), "Story".to_string()],
        );
        let targets = selection.resolve(&catalog).unwrap_or_default();
        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Story", "Square"]);
        assert_eq!(targets[0].height, 1920);
    }

    #[test]
    fn resolve_rejects_empty_and_unknown_sizes() {
        let catalog = SizeCatalog::builtin();
        let empty = SizeSelection::new("Facebook", Vec::new());
        assert_eq!(empty.resolve(&catalog), Err(NO_SIZE_SELECTED.to_string()));

        let unknown = SizeSelection::new("Facebook", vec!["Billboard".to_string()]);
        assert_eq!(
            unknown.resolve(&catalog),
            Err("Unknown size 'Billboard' for platform 'Facebook'.".to_string())
        );
    }
}

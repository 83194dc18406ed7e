use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

/// A (platform, size) pair resolved from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeTarget {
    pub platform: String,
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl SizeTarget {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }

    pub fn label(&self) -> String {
        format!("{} - {}", self.platform, self.name)
    }
}

/// Read-only platform → sizes reference data. Platform and size order is the
/// order the catalog was delivered in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SizeCatalog {
    platforms: IndexMap<String, Vec<SizeSpec>>,
}

impl SizeCatalog {
    pub fn new(platforms: IndexMap<String, Vec<SizeSpec>>) -> Self {
        let platforms = platforms
            .into_iter()
            .map(|(platform, sizes)| {
                let sizes = sizes
                    .into_iter()
                    .filter(|size| size.width > 0 && size.height > 0)
                    .collect::<Vec<SizeSpec>>();
                (platform, sizes)
            })
            .collect();
        Self { platforms }
    }

    /// Accepts either `{"sizes": {platform: [...]}}` or the bare mapping.
    pub fn from_value(payload: &Value) -> anyhow::Result<Self> {
        let mapping = payload.get("sizes").unwrap_or(payload);
        let platforms: IndexMap<String, Vec<SizeSpec>> =
            serde_json::from_value(mapping.clone())?;
        Ok(Self::new(platforms))
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "sizes": self.platforms })
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.platforms.keys().map(String::as_str)
    }

    pub fn sizes(&self, platform: &str) -> &[SizeSpec] {
        self.platforms
            .get(platform)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first_size(&self, platform: &str) -> Option<&SizeSpec> {
        self.sizes(platform).first()
    }

    pub fn target(&self, platform: &str, name: &str) -> Option<SizeTarget> {
        self.sizes(platform)
            .iter()
            .find(|size| size.name == name)
            .map(|size| SizeTarget {
                platform: platform.to_string(),
                name: size.name.clone(),
                width: size.width,
                height: size.height,
            })
    }

    /// Built-in catalog served by the dry-run backend.
    pub fn builtin() -> Self {
        let mut platforms = IndexMap::new();
        let mut insert = |platform: &str, sizes: &[(&str, u32, u32)]| {
            platforms.insert(
                platform.to_string(),
                sizes
                    .iter()
                    .map(|(name, width, height)| SizeSpec {
                        name: (*name).to_string(),
                        width: *width,
                        height: *height,
                    })
                    .collect(),
            );
        };

        insert(
            "Facebook",
            &[
                ("Square", 1080, 1080),
                ("Landscape", 1200, 628),
                ("Story", 1080, 1920),
            ],
        );
        insert(
            "Instagram",
            &[
                ("Square", 1080, 1080),
                ("Portrait", 1080, 1350),
                ("Story", 1080, 1920),
            ],
        );
        insert(
            "LinkedIn",
            &[
                ("Square", 1200, 1200),
                ("Landscape", 1200, 627),
            ],
        );
        insert(
            "Google Ads",
            &[
                ("Medium Rectangle", 300, 250),
                ("Leaderboard", 728, 90),
                ("Wide Skyscraper", 160, 600),
                ("Large Rectangle", 336, 280),
            ],
        );

        Self::new(platforms)
    }
}

use serde::{Deserialize, Serialize};

use crate::{AtlasCreateError, Rgba};

/// Largest number of parallel slots one grouped tile may span.
pub const MAX_GROUP_SLOTS: usize = 4;

/// Format versions at or above this guarantee sources are already in page colour space.
pub const PRECONVERTED_FORMAT_VERSION: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    pub page_width: u32,
    pub page_height: u32,
    /// Pixels per occupancy cell along each edge.
    pub cell_size: u32,
    /// Edge-bleed pad applied once on each side of every tile.
    pub margin: u32,
    pub dedup: bool,
    pub auto_grow: bool,
    pub initial_pages: u32,
    pub max_pages: u32,
    pub max_tile_pixels: u32,
    pub gamma_space: bool,
    pub source_format_version: u32,
    pub background: Rgba,
    pub swatch_size: u32,
    pub reserve_swatch_quadrant: bool,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            page_width: 2048,
            page_height: 2048,
            cell_size: 16,
            margin: 2,
            dedup: true,
            auto_grow: true,
            initial_pages: 1,
            max_pages: 16,
            max_tile_pixels: 2048,
            gamma_space: false,
            source_format_version: 0,
            background: Rgba::TRANSPARENT,
            swatch_size: 4,
            reserve_swatch_quadrant: false,
        }
    }
}

/// Partial override of an [`AtlasConfig`]; `None` keeps the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfigPatch {
    pub page_width: Option<u32>,
    pub page_height: Option<u32>,
    pub cell_size: Option<u32>,
    pub margin: Option<u32>,
    pub dedup: Option<bool>,
    pub auto_grow: Option<bool>,
    pub initial_pages: Option<u32>,
    pub max_pages: Option<u32>,
    pub max_tile_pixels: Option<u32>,
    pub gamma_space: Option<bool>,
    pub source_format_version: Option<u32>,
    pub background: Option<Rgba>,
    pub swatch_size: Option<u32>,
    pub reserve_swatch_quadrant: Option<bool>,
}

impl AtlasConfig {
    pub fn merge(&self, patch: &AtlasConfigPatch) -> Self {
        Self {
            page_width: patch.page_width.unwrap_or(self.page_width),
            page_height: patch.page_height.unwrap_or(self.page_height),
            cell_size: patch.cell_size.unwrap_or(self.cell_size),
            margin: patch.margin.unwrap_or(self.margin),
            dedup: patch.dedup.unwrap_or(self.dedup),
            auto_grow: patch.auto_grow.unwrap_or(self.auto_grow),
            initial_pages: patch.initial_pages.unwrap_or(self.initial_pages),
            max_pages: patch.max_pages.unwrap_or(self.max_pages),
            max_tile_pixels: patch.max_tile_pixels.unwrap_or(self.max_tile_pixels),
            gamma_space: patch.gamma_space.unwrap_or(self.gamma_space),
            source_format_version: patch
                .source_format_version
                .unwrap_or(self.source_format_version),
            background: patch.background.unwrap_or(self.background),
            swatch_size: patch.swatch_size.unwrap_or(self.swatch_size),
            reserve_swatch_quadrant: patch
                .reserve_swatch_quadrant
                .unwrap_or(self.reserve_swatch_quadrant),
        }
    }

    pub fn validate(&self) -> Result<(), AtlasCreateError> {
        if self.page_width == 0 || self.page_height == 0 {
            return Err(AtlasCreateError::PageSizeZero);
        }
        if self.cell_size == 0 {
            return Err(AtlasCreateError::CellSizeZero);
        }
        if self.page_width % self.cell_size != 0 || self.page_height % self.cell_size != 0 {
            return Err(AtlasCreateError::PageNotCellAligned);
        }
        if self.margin.saturating_mul(2) >= self.page_width.min(self.page_height) {
            return Err(AtlasCreateError::MarginTooLarge);
        }
        if self.initial_pages == 0 {
            return Err(AtlasCreateError::InitialPagesZero);
        }
        if self.initial_pages > self.max_pages {
            return Err(AtlasCreateError::InitialPagesExceedMax);
        }
        if self.swatch_size == 0 || self.cell_size % self.swatch_size != 0 {
            return Err(AtlasCreateError::SwatchSizeInvalid);
        }
        Ok(())
    }

    pub fn preconverted_sources(&self) -> bool {
        self.source_format_version >= PRECONVERTED_FORMAT_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(AtlasConfig::default().validate(), Ok(()));
    }

    #[test]
    fn merge_only_overrides_present_fields() {
        let base = AtlasConfig::default();
        let merged = base.merge(&AtlasConfigPatch {
            cell_size: Some(32),
            dedup: Some(false),
            background: Some(Rgba::new(255, 0, 255, 255)),
            ..AtlasConfigPatch::default()
        });

        assert_eq!(merged.cell_size, 32);
        assert!(!merged.dedup);
        assert_eq!(merged.background, Rgba::new(255, 0, 255, 255));
        assert_eq!(merged.page_width, base.page_width);
        assert_eq!(merged.margin, base.margin);
        assert_eq!(merged.max_pages, base.max_pages);
    }

    #[test]
    fn empty_patch_is_identity() {
        let base = AtlasConfig {
            margin: 0,
            gamma_space: true,
            ..AtlasConfig::default()
        };
        assert_eq!(base.merge(&AtlasConfigPatch::default()), base);
    }

    #[test]
    fn validate_rejects_unaligned_page() {
        let config = AtlasConfig {
            page_width: 1000,
            ..AtlasConfig::default()
        };
        assert_eq!(config.validate(), Err(AtlasCreateError::PageNotCellAligned));
    }

    #[test]
    fn validate_rejects_page_budget_inversion() {
        let config = AtlasConfig {
            initial_pages: 4,
            max_pages: 2,
            ..AtlasConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(AtlasCreateError::InitialPagesExceedMax)
        );
    }

    #[test]
    fn validate_rejects_swatch_not_dividing_cell() {
        let config = AtlasConfig {
            swatch_size: 5,
            ..AtlasConfig::default()
        };
        assert_eq!(config.validate(), Err(AtlasCreateError::SwatchSizeInvalid));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: AtlasConfig =
            serde_json::from_str(r#"{ "page_width": 1024, "background": [0, 0, 0, 255] }"#)
                .unwrap();
        assert_eq!(config.page_width, 1024);
        assert_eq!(config.page_height, 2048);
        assert_eq!(config.background, Rgba::new(0, 0, 0, 255));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn patch_deserializes_and_merges() {
        let patch: AtlasConfigPatch =
            serde_json::from_str(r#"{ "margin": 0, "auto_grow": false }"#).unwrap();
        let merged = AtlasConfig::default().merge(&patch);
        assert_eq!(merged.margin, 0);
        assert!(!merged.auto_grow);
        assert!(merged.dedup);
    }

    #[test]
    fn preconverted_from_version_four() {
        let mut config = AtlasConfig::default();
        config.source_format_version = 3;
        assert!(!config.preconverted_sources());
        config.source_format_version = 4;
        assert!(config.preconverted_sources());
    }
}

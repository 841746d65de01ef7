//! Sheet configuration and documented defaults

use crate::coerce::BooleanLabels;
use crate::error::{ExcelError, Result};
use crate::style::RowStyleTemplate;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default column width in character units
pub const DEFAULT_CELL_WIDTH: u32 = 20;

/// Default 1-based row where reading starts; row 1 holds the titles
pub const DEFAULT_READ_START_ROW: u32 = 2;

/// Column width as stored by the container (1/256 of a character)
pub fn stored_column_width(units: u32) -> u32 {
    units.saturating_mul(256).saturating_add(184)
}

/// Layout and look of the sheets produced for one record type
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SheetConfig {
    /// Sheet name; `None` generates `Sheet{n}`
    pub name: Option<String>,
    pub cell_width_units: u32,
    pub title: RowStyleTemplate,
    pub body: RowStyleTemplate,
    pub footer: Option<RowStyleTemplate>,
    pub boolean_labels: BooleanLabels,
}

impl Default for SheetConfig {
    fn default() -> Self {
        SheetConfig {
            name: None,
            cell_width_units: DEFAULT_CELL_WIDTH,
            title: RowStyleTemplate::default_title(),
            body: RowStyleTemplate::default_body(),
            footer: None,
            boolean_labels: BooleanLabels::default(),
        }
    }
}

impl SheetConfig {
    /// Column width in the container's 1/256-character unit
    pub fn stored_width(&self) -> u32 {
        stored_column_width(self.cell_width_units)
    }

    /// Body rows must start below the title row
    pub fn validate(&self) -> Result<()> {
        if self.body.row_index <= self.title.row_index {
            return Err(ExcelError::InvalidState(format!(
                "body rows start at index {} which is not below the title row {}",
                self.body.row_index, self.title.row_index
            )));
        }
        if self.cell_width_units == 0 || self.cell_width_units > 255 {
            return Err(ExcelError::InvalidState(format!(
                "cell width {} is outside 1..=255 characters",
                self.cell_width_units
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_width() {
        let config = SheetConfig::default();
        assert_eq!(config.stored_width(), 20 * 256 + 184);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_body_must_follow_title() {
        let config = SheetConfig {
            body: RowStyleTemplate::default_body().with_row_index(0),
            ..SheetConfig::default()
        };
        assert!(matches!(config.validate(), Err(ExcelError::InvalidState(_))));
    }
}

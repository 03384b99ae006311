//! Series data access port trait.

use crate::domain::data_table::SeriesInput;
use crate::domain::error::RuletraderError;
use crate::domain::frequency::Frequency;

pub trait DataPort {
    /// Load every observation of series `id`, tagged with `frequency`.
    fn fetch_series(&self, id: &str, frequency: Frequency) -> Result<SeriesInput, RuletraderError>;

    fn list_series(&self) -> Result<Vec<String>, RuletraderError>;
}

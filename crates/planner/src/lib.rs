#![deny(warnings)]

//! Chain form model: collects building rows, validates them as a whole and
//! turns a valid form into a saved production chain.

use persistence::{ChainStore, StoreError};
use prod_core::{parse_duration, Building, DurationError, Minutes, NewChain, ProductionChain};
use prod_ratio::{calculate_ratios_exact, RatioResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// A form always keeps at least this many building rows.
pub const MIN_BUILDINGS: usize = 2;

/// Raw text of one building row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingInput {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "duration_text")]
    pub duration: String,
}

impl BuildingInput {
    pub fn new(name: impl Into<String>, duration: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration: duration.into(),
        }
    }
}

/// Durations may be written as strings or bare integers. Unquoted decimals
/// such as `1.30` are refused because a float would lose the seconds digits.
fn duration_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Text {
        Str(String),
        Int(i64),
    }
    match Text::deserialize(deserializer) {
        Ok(Text::Str(s)) => Ok(s),
        Ok(Text::Int(i)) => Ok(i.to_string()),
        Err(_) => Err(serde::de::Error::custom(
            "duration must be a quoted string such as \"1:30\" or a whole number",
        )),
    }
}

/// Problem with a single duration field.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error(transparent)]
    Parse(#[from] DurationError),
    /// Zero-length cycles cannot anchor a ratio.
    #[error("duration must be greater than 0")]
    NotPositive,
}

/// Reasons a form cannot be computed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("please enter a name for the production chain")]
    MissingChainName,
    #[error("a production chain needs at least {} buildings", MIN_BUILDINGS)]
    TooFewBuildings,
    #[error("please fill in the name of building {}", .index + 1)]
    MissingBuildingName { index: usize },
    /// Every failing duration row, in row order.
    #[error("{}", describe_rows(.0))]
    InvalidDurations(Vec<(usize, RowError)>),
}

fn describe_rows(rows: &[(usize, RowError)]) -> String {
    match rows.first() {
        Some((index, err)) if rows.len() == 1 => {
            format!("validation error: building {}: {}", index + 1, err)
        }
        Some((index, err)) => format!(
            "validation error: building {}: {} (and {} more)",
            index + 1,
            err,
            rows.len() - 1
        ),
        None => "validation error".to_string(),
    }
}

/// Failure of [`ChainForm::submit`].
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Editable chain form.
///
/// Editing a building row discards any computed result; editing a duration
/// also clears that row's error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainForm {
    #[serde(default)]
    name: String,
    #[serde(default)]
    buildings: Vec<BuildingInput>,
    #[serde(skip)]
    result: Option<RatioResult>,
    #[serde(skip)]
    errors: BTreeMap<usize, RowError>,
}

impl Default for ChainForm {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainForm {
    /// Empty form with [`MIN_BUILDINGS`] blank rows.
    pub fn new() -> Self {
        Self {
            name: String::new(),
            buildings: vec![BuildingInput::default(); MIN_BUILDINGS],
            result: None,
            errors: BTreeMap::new(),
        }
    }

    /// Form pre-filled with a name and rows.
    pub fn with_rows<I>(name: impl Into<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = BuildingInput>,
    {
        Self {
            name: name.into(),
            buildings: rows.into_iter().collect(),
            result: None,
            errors: BTreeMap::new(),
        }
    }

    /// Read a form document (`name`, `buildings: [{name, duration}]`).
    /// JSON documents are accepted too.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buildings(&self) -> &[BuildingInput] {
        &self.buildings
    }

    /// Result of the last successful [`ChainForm::compute`], if still current.
    pub fn result(&self) -> Option<&RatioResult> {
        self.result.as_ref()
    }

    pub fn duration_error(&self, index: usize) -> Option<&RowError> {
        self.errors.get(&index)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Append a blank row and return its index.
    pub fn add_building(&mut self) -> usize {
        self.buildings.push(BuildingInput::default());
        self.result = None;
        self.buildings.len() - 1
    }

    /// Remove a row. Refused (returns `false`) when out of range or when only
    /// [`MIN_BUILDINGS`] rows remain.
    pub fn remove_building(&mut self, index: usize) -> bool {
        if index >= self.buildings.len() || self.buildings.len() <= MIN_BUILDINGS {
            return false;
        }
        self.buildings.remove(index);
        self.errors = std::mem::take(&mut self.errors)
            .into_iter()
            .filter(|(i, _)| *i != index)
            .map(|(i, e)| if i > index { (i - 1, e) } else { (i, e) })
            .collect();
        self.result = None;
        true
    }

    pub fn set_building_name(&mut self, index: usize, name: impl Into<String>) -> bool {
        let Some(row) = self.buildings.get_mut(index) else {
            return false;
        };
        row.name = name.into();
        self.result = None;
        true
    }

    pub fn set_building_duration(&mut self, index: usize, duration: impl Into<String>) -> bool {
        let Some(row) = self.buildings.get_mut(index) else {
            return false;
        };
        row.duration = duration.into();
        self.errors.remove(&index);
        self.result = None;
        true
    }

    /// Back to the initial blank form.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Validate every field and compute ratios.
    ///
    /// Checks run in order: chain name, row count, building names, then all
    /// durations at once. Duration failures are collected for every row and
    /// remembered on the form.
    pub fn compute(&mut self) -> Result<NewChain, FormError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(FormError::MissingChainName);
        }
        if self.buildings.len() < MIN_BUILDINGS {
            return Err(FormError::TooFewBuildings);
        }
        if let Some(index) = self.buildings.iter().position(|b| b.name.trim().is_empty()) {
            return Err(FormError::MissingBuildingName { index });
        }

        let mut durations: Vec<Minutes> = Vec::with_capacity(self.buildings.len());
        let mut errors = BTreeMap::new();
        for (i, b) in self.buildings.iter().enumerate() {
            match parse_duration(&b.duration) {
                Ok(m) if m.is_zero() => {
                    errors.insert(i, RowError::NotPositive);
                }
                Ok(m) => durations.push(m),
                Err(e) => {
                    errors.insert(i, RowError::Parse(e));
                }
            }
        }
        if !errors.is_empty() {
            debug!(rows = errors.len(), "rejected durations");
            self.errors = errors.clone();
            self.result = None;
            return Err(FormError::InvalidDurations(errors.into_iter().collect()));
        }
        self.errors.clear();

        let result = calculate_ratios_exact(&durations);
        let buildings = self
            .buildings
            .iter()
            .zip(&durations)
            .zip(&result.ratios)
            .map(|((b, d), &ratio)| Building {
                name: b.name.trim().to_string(),
                duration: d.to_f64(),
                ratio: Some(ratio),
            })
            .collect();
        let chain = NewChain {
            name,
            buildings,
            base: result.base,
        };
        self.result = Some(result);
        Ok(chain)
    }

    /// Compute and save. Nothing is stored when validation fails.
    pub fn submit(&mut self, store: &mut ChainStore) -> Result<ProductionChain, SubmitError> {
        let chain = self.compute()?;
        Ok(store.add(chain)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::StoreConfig;

    fn wool_form() -> ChainForm {
        ChainForm::with_rows(
            " Wool ",
            [
                BuildingInput::new("Sheep Farm ", "0:30"),
                BuildingInput::new("Weaver", "1"),
            ],
        )
    }

    #[test]
    fn new_form_has_minimum_rows() {
        let mut form = ChainForm::new();
        assert_eq!(form.buildings().len(), MIN_BUILDINGS);
        assert!(!form.remove_building(0));
        let idx = form.add_building();
        assert_eq!(idx, 2);
        assert!(form.remove_building(idx));
        assert!(!form.remove_building(5));
    }

    #[test]
    fn compute_wool_chain() {
        let mut form = wool_form();
        let chain = form.compute().unwrap();
        assert_eq!(chain.name, "Wool");
        assert_eq!(chain.base, 1);
        assert_eq!(chain.buildings[0].name, "Sheep Farm");
        assert_eq!(chain.buildings[0].duration, 0.5);
        assert_eq!(chain.buildings[0].ratio, Some(1));
        assert_eq!(chain.buildings[1].ratio, Some(2));
        assert_eq!(form.result().unwrap().ratios, vec![1, 2]);
    }

    #[test]
    fn validation_order() {
        let mut form = ChainForm::new();
        assert_eq!(form.compute(), Err(FormError::MissingChainName));

        form.set_name("Wine");
        assert_eq!(
            form.compute(),
            Err(FormError::MissingBuildingName { index: 0 })
        );

        let mut short = ChainForm::with_rows("Wine", [BuildingInput::new("Vineyard", "2")]);
        assert_eq!(short.compute(), Err(FormError::TooFewBuildings));
    }

    #[test]
    fn duration_errors_are_aggregated() {
        let mut form = ChainForm::with_rows(
            "Bread",
            [
                BuildingInput::new("Farm", "1:60"),
                BuildingInput::new("Mill", "2"),
                BuildingInput::new("Bakery", "0"),
            ],
        );
        let err = form.compute().unwrap_err();
        assert_eq!(
            err,
            FormError::InvalidDurations(vec![
                (0, RowError::Parse(DurationError::SecondsOutOfRange(60))),
                (2, RowError::NotPositive),
            ])
        );
        assert!(err.to_string().contains("building 1"));
        assert!(err.to_string().contains("and 1 more"));
        assert!(form.duration_error(0).is_some());
        assert!(form.duration_error(1).is_none());
        assert!(form.result().is_none());

        form.set_building_duration(0, "1:30");
        assert!(form.duration_error(0).is_none());
        assert!(form.duration_error(2).is_some());
    }

    #[test]
    fn removing_a_row_shifts_errors() {
        let mut form = ChainForm::with_rows(
            "Bread",
            [
                BuildingInput::new("Farm", "x"),
                BuildingInput::new("Mill", "2"),
                BuildingInput::new("Bakery", ""),
            ],
        );
        assert!(form.compute().is_err());
        assert!(form.remove_building(0));
        assert_eq!(
            form.duration_error(1),
            Some(&RowError::Parse(DurationError::Empty))
        );
        assert!(form.duration_error(2).is_none());
    }

    #[test]
    fn editing_rows_discards_result() {
        let mut form = wool_form();
        form.compute().unwrap();
        form.set_name("Renamed");
        assert!(form.result().is_some());
        form.set_building_name(1, "Loom");
        assert!(form.result().is_none());
    }

    #[test]
    fn clear_resets_form() {
        let mut form = wool_form();
        form.compute().unwrap();
        form.clear();
        assert_eq!(form, ChainForm::new());
    }

    #[test]
    fn submit_saves_only_valid_forms() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(tmp.path().to_path_buf());
        let mut store = ChainStore::open(&config).unwrap();

        let mut bad = ChainForm::new();
        assert!(matches!(
            bad.submit(&mut store),
            Err(SubmitError::Form(FormError::MissingChainName))
        ));
        assert!(store.is_empty());

        let saved = wool_form().submit(&mut store).unwrap();
        assert_eq!(saved.name, "Wool");
        let reopened = ChainStore::open(&config).unwrap();
        assert_eq!(reopened.get(&saved.id), Some(&saved));
    }

    #[test]
    fn yaml_documents() {
        let text = r#"
name: Wine
buildings:
  - name: Vineyard
    duration: 2
  - name: Wine Press
    duration: "1:30"
"#;
        let mut form = ChainForm::from_yaml(text).unwrap();
        let chain = form.compute().unwrap();
        assert_eq!(chain.base, 6);
        let ratios: Vec<Option<u64>> = chain.buildings.iter().map(|b| b.ratio).collect();
        assert_eq!(ratios, vec![Some(4), Some(3)]);

        let json = r#"{"name":"Wool","buildings":[{"name":"Sheep","duration":"0,30"},{"name":"Weaver","duration":"1"}]}"#;
        assert!(ChainForm::from_yaml(json).unwrap().compute().is_ok());
    }

    #[test]
    fn unquoted_decimal_duration_is_refused() {
        let text = "name: Wine\nbuildings:\n  - name: Press\n    duration: 1.30\n";
        let err = ChainForm::from_yaml(text).unwrap_err();
        assert!(err.to_string().contains("quoted"));
    }
}

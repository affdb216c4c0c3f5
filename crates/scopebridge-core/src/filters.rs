//! Search filters and their state helpers.
//!
//! A filter describes a control the host renders; the user's selection is
//! kept in the query's [`FilterState`] under the filter id.

use serde::{Deserialize, Serialize};

use crate::error::RequestError;
use crate::query::FilterState;
use crate::value::Value;

/// Rendering hint: show the filter in the primary navigation area.
pub const DISPLAY_PRIMARY: u32 = 1;

/// One selectable option of a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOption {
    pub id: String,
    pub label: String,
}

impl FilterOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Fields shared by every filter kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterBase {
    pub id: String,
    #[serde(default)]
    pub display_hints: u32,
    #[serde(default)]
    pub label: String,
}

impl FilterBase {
    fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_hints: 0,
            label: label.into(),
        }
    }
}

/// A filter of any kind, tagged by `filter_type` on the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter_type", rename_all = "snake_case")]
pub enum Filter {
    OptionSelector(OptionSelectorFilter),
    RadioButtons(RadioButtonsFilter),
    Switch(SwitchFilter),
    Rating(RatingFilter),
    ValueSlider(ValueSliderFilter),
    RangeInput(RangeInputFilter),
}

impl Filter {
    pub fn id(&self) -> &str {
        &self.base().id
    }

    pub fn base(&self) -> &FilterBase {
        match self {
            Self::OptionSelector(f) => &f.base,
            Self::RadioButtons(f) => &f.base,
            Self::Switch(f) => &f.base,
            Self::Rating(f) => &f.base,
            Self::ValueSlider(f) => &f.base,
            Self::RangeInput(f) => &f.base,
        }
    }

    /// Check the filter is self-consistent.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.id().is_empty() {
            return Err(RequestError::invalid("filter id cannot be empty"));
        }
        match self {
            Self::ValueSlider(f) if !(f.min < f.max) => Err(RequestError::invalid(format!(
                "slider '{}' has an empty range",
                f.base.id
            ))),
            Self::ValueSlider(f) if f.default_value < f.min || f.default_value > f.max => {
                Err(RequestError::OutOfRange {
                    filter: f.base.id.clone(),
                    value: f.default_value,
                })
            }
            _ => Ok(()),
        }
    }
}

fn string_list(state: &FilterState, id: &str) -> Vec<String> {
    state
        .get(id)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn check_option(base: &FilterBase, options: &[FilterOption], option_id: &str) -> Result<(), RequestError> {
    if options.iter().any(|o| o.id == option_id) {
        Ok(())
    } else {
        Err(RequestError::UnknownOption {
            filter: base.id.clone(),
            option: option_id.to_string(),
        })
    }
}

fn toggle(state: &mut FilterState, id: &str, option_id: &str, active: bool, multi_select: bool) {
    let mut current = if multi_select {
        string_list(state, id)
    } else {
        Vec::new()
    };
    current.retain(|o| o != option_id);
    if active {
        current.push(option_id.to_string());
    } else if !multi_select && string_list(state, id).iter().any(|o| o != option_id) {
        // Deactivating an option that is not selected keeps the selection.
        return;
    }
    state.insert(id.to_string(), Value::from(current));
}

/// A list of options, single or multi select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSelectorFilter {
    #[serde(flatten)]
    pub base: FilterBase,
    #[serde(default)]
    pub multi_select: bool,
    #[serde(default)]
    pub options: Vec<FilterOption>,
}

impl OptionSelectorFilter {
    pub fn new(id: impl Into<String>, label: impl Into<String>, multi_select: bool) -> Self {
        Self {
            base: FilterBase::new(id, label),
            multi_select,
            options: Vec::new(),
        }
    }

    pub fn add_option(&mut self, id: impl Into<String>, label: impl Into<String>) {
        self.options.push(FilterOption::new(id, label));
    }

    pub fn active_options(&self, state: &FilterState) -> Vec<String> {
        string_list(state, &self.base.id)
    }

    pub fn has_active_option(&self, state: &FilterState) -> bool {
        !self.active_options(state).is_empty()
    }

    pub fn update_state(
        &self,
        state: &mut FilterState,
        option_id: &str,
        active: bool,
    ) -> Result<(), RequestError> {
        check_option(&self.base, &self.options, option_id)?;
        toggle(state, &self.base.id, option_id, active, self.multi_select);
        Ok(())
    }
}

/// Mutually exclusive options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioButtonsFilter {
    #[serde(flatten)]
    pub base: FilterBase,
    #[serde(default)]
    pub options: Vec<FilterOption>,
}

impl RadioButtonsFilter {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            base: FilterBase::new(id, label),
            options: Vec::new(),
        }
    }

    pub fn add_option(&mut self, id: impl Into<String>, label: impl Into<String>) {
        self.options.push(FilterOption::new(id, label));
    }

    pub fn active_option(&self, state: &FilterState) -> Option<String> {
        string_list(state, &self.base.id).into_iter().next()
    }

    pub fn update_state(
        &self,
        state: &mut FilterState,
        option_id: &str,
        active: bool,
    ) -> Result<(), RequestError> {
        check_option(&self.base, &self.options, option_id)?;
        toggle(state, &self.base.id, option_id, active, false);
        Ok(())
    }
}

/// An on/off toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchFilter {
    #[serde(flatten)]
    pub base: FilterBase,
}

impl SwitchFilter {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            base: FilterBase::new(id, label),
        }
    }

    pub fn is_on(&self, state: &FilterState) -> bool {
        state.get(&self.base.id).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn update_state(&self, state: &mut FilterState, on: bool) {
        state.insert(self.base.id.clone(), Value::Bool(on));
    }
}

/// Star ratings: a single selected option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingFilter {
    #[serde(flatten)]
    pub base: FilterBase,
    #[serde(default)]
    pub on_icon: String,
    #[serde(default)]
    pub off_icon: String,
    #[serde(default)]
    pub options: Vec<FilterOption>,
}

impl RatingFilter {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            base: FilterBase::new(id, label),
            on_icon: String::new(),
            off_icon: String::new(),
            options: Vec::new(),
        }
    }

    /// Add options `1..=top` labelled "N+".
    pub fn with_star_options(mut self, top: u32) -> Self {
        for n in 1..=top {
            self.options.push(FilterOption::new(n.to_string(), format!("{n}+")));
        }
        self
    }

    pub fn active_rating(&self, state: &FilterState) -> Option<String> {
        state.get(&self.base.id).and_then(Value::as_str).map(str::to_string)
    }

    pub fn update_state(
        &self,
        state: &mut FilterState,
        option_id: &str,
        active: bool,
    ) -> Result<(), RequestError> {
        check_option(&self.base, &self.options, option_id)?;
        if active {
            state.insert(self.base.id.clone(), Value::from(option_id));
        } else if self.active_rating(state).as_deref() == Some(option_id) {
            state.remove(&self.base.id);
        }
        Ok(())
    }
}

/// Direction of a value slider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliderType {
    #[default]
    LessThan,
    MoreThan,
}

/// A single numeric value between bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSliderFilter {
    #[serde(flatten)]
    pub base: FilterBase,
    pub min: f64,
    pub max: f64,
    pub default_value: f64,
    #[serde(default)]
    pub slider_type: SliderType,
    #[serde(default)]
    pub label_template: String,
}

impl ValueSliderFilter {
    pub fn new(id: impl Into<String>, label: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            base: FilterBase::new(id, label),
            min,
            max,
            default_value: max,
            slider_type: SliderType::LessThan,
            label_template: String::new(),
        }
    }

    /// The selected value, or the default when unset.
    pub fn value(&self, state: &FilterState) -> f64 {
        state
            .get(&self.base.id)
            .and_then(Value::as_f64)
            .unwrap_or(self.default_value)
    }

    pub fn update_state(&self, state: &mut FilterState, value: f64) -> Result<(), RequestError> {
        if !value.is_finite() || value < self.min || value > self.max {
            return Err(RequestError::OutOfRange {
                filter: self.base.id.clone(),
                value,
            });
        }
        state.insert(self.base.id.clone(), Value::Float(value));
        Ok(())
    }
}

/// A start and end value, each optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeInputFilter {
    #[serde(flatten)]
    pub base: FilterBase,
    #[serde(default)]
    pub start_prefix_label: String,
    #[serde(default)]
    pub start_postfix_label: String,
    #[serde(default)]
    pub end_prefix_label: String,
    #[serde(default)]
    pub end_postfix_label: String,
    #[serde(default)]
    pub central_label: String,
}

impl RangeInputFilter {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            base: FilterBase::new(id, label),
            start_prefix_label: String::new(),
            start_postfix_label: String::new(),
            end_prefix_label: String::new(),
            end_postfix_label: String::new(),
            central_label: String::new(),
        }
    }

    fn bound(&self, state: &FilterState, index: usize) -> Option<f64> {
        state
            .get(&self.base.id)
            .and_then(Value::as_array)
            .and_then(|pair| pair.get(index))
            .and_then(Value::as_f64)
    }

    pub fn start_value(&self, state: &FilterState) -> Option<f64> {
        self.bound(state, 0)
    }

    pub fn end_value(&self, state: &FilterState) -> Option<f64> {
        self.bound(state, 1)
    }

    pub fn update_state(
        &self,
        state: &mut FilterState,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Result<(), RequestError> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(RequestError::OutOfRange {
                    filter: self.base.id.clone(),
                    value: s,
                });
            }
        }
        let pair = Value::Array(vec![Value::from(start), Value::from(end)]).sanitized();
        state.insert(self.base.id.clone(), pair);
        Ok(())
    }
}

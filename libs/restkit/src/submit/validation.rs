use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Informational,
}

/// One finding recorded against a change-set item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeSetItemValidationResult {
    /// Position of the item in its change set.
    pub item_index: usize,
    pub resource_set: String,
    /// Property the finding concerns; `None` for the whole entity.
    pub property_path: Option<String>,
    pub severity: Severity,
    pub message: String,
    /// Optional machine-readable identifier of the rule.
    pub id: Option<String>,
}

impl ChangeSetItemValidationResult {
    pub fn new(
        item_index: usize,
        resource_set: impl Into<String>,
        property_path: Option<&str>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            item_index,
            resource_set: resource_set.into(),
            property_path: property_path.map(str::to_owned),
            severity,
            message: message.into(),
            id: None,
        }
    }

    pub fn error(
        item_index: usize,
        resource_set: impl Into<String>,
        property_path: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(item_index, resource_set, property_path, Severity::Error, message)
    }

    pub fn warning(
        item_index: usize,
        resource_set: impl Into<String>,
        property_path: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(item_index, resource_set, property_path, Severity::Warning, message)
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ChangeSetItemValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}#{}", self.severity, self.resource_set, self.item_index)?;
        if let Some(path) = &self.property_path {
            write!(f, ".{path}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Results accumulated during one validation pass, in recording order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationResults {
    results: Vec<ChangeSetItemValidationResult>,
}

impl ValidationResults {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: ChangeSetItemValidationResult) {
        self.results.push(result);
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.results.iter().any(ChangeSetItemValidationResult::is_error)
    }

    /// True when `item_index` has at least one Error-severity result.
    #[must_use]
    pub fn item_has_errors(&self, item_index: usize) -> bool {
        self.results
            .iter()
            .any(|r| r.item_index == item_index && r.is_error())
    }

    #[must_use]
    pub fn results(&self) -> &[ChangeSetItemValidationResult] {
        &self.results
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<ChangeSetItemValidationResult> {
        self.results
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut results = ValidationResults::new();
        results.push(ChangeSetItemValidationResult::warning(0, "Products", None, "odd"));
        assert!(!results.has_errors());

        results.push(ChangeSetItemValidationResult::error(1, "Products", Some("Name"), "required"));
        assert!(results.has_errors());
        assert!(results.item_has_errors(1));
        assert!(!results.item_has_errors(0));
        assert_eq!(results.into_vec()[0].severity, Severity::Warning);
    }

    #[test]
    fn display_names_item_and_property() {
        let r = ChangeSetItemValidationResult::error(2, "Orders", Some("Total"), "must be positive");
        assert_eq!(r.to_string(), "[Error] Orders#2.Total: must be positive");
    }
}

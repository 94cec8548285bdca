use crate::model::{Id, RefNamespace};
use std::collections::{BTreeMap, HashMap};

/// Identifier tables for one application run.
///
/// Created fresh for every run and passed explicitly through each phase;
/// nothing here is persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionContext {
    /// template-local id -> real id, every created record
    pub by_template_id: HashMap<Id, Id>,
    /// template-local id -> real id, groups only
    pub group_ids: HashMap<Id, Id>,
    /// display name -> real id
    pub by_name: HashMap<String, Id>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a run from an externally supplied partial mapping
    pub fn seeded(pre_mapping: &HashMap<Id, Id>) -> Self {
        Self {
            by_template_id: pre_mapping.clone(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, template_id: &str, name: &str, real_id: &str) {
        self.by_template_id
            .insert(template_id.to_string(), real_id.to_string());
        if !name.trim().is_empty() {
            self.by_name.insert(name.to_string(), real_id.to_string());
        }
    }

    pub fn record_group(&mut self, template_id: &str, name: &str, real_id: &str) {
        self.group_ids
            .insert(template_id.to_string(), real_id.to_string());
        self.record(template_id, name, real_id);
    }

    /// Register a pre-mapped group so group-valued fields can reach it
    pub fn seed_group(&mut self, template_id: &str, real_id: &str) {
        self.group_ids
            .insert(template_id.to_string(), real_id.to_string());
    }

    /// Look a reference up in the table(s) of the given namespace
    pub fn lookup(&self, namespace: RefNamespace, reference: &str) -> Option<&Id> {
        match namespace {
            RefNamespace::General => self
                .by_template_id
                .get(reference)
                .or_else(|| self.by_name.get(reference)),
            RefNamespace::Groups => self.group_ids.get(reference),
            RefNamespace::Names => self.by_name.get(reference),
        }
    }

    /// Sorted copy of the template-id table for reporting
    pub fn snapshot(&self) -> BTreeMap<Id, Id> {
        self.by_template_id
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Fold in the tables built by an independent creation routine
    pub fn absorb(&mut self, other: ResolutionContext) {
        self.by_template_id.extend(other.by_template_id);
        self.group_ids.extend(other.group_ids);
        self.by_name.extend(other.by_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_general_lookup_falls_back_to_names() {
        let mut ctx = ResolutionContext::new();
        ctx.record("L1", "Ashford Manor", "loc-real");

        assert_eq!(ctx.lookup(RefNamespace::General, "L1"), Some(&"loc-real".to_string()));
        assert_eq!(
            ctx.lookup(RefNamespace::General, "Ashford Manor"),
            Some(&"loc-real".to_string())
        );
        assert_eq!(ctx.lookup(RefNamespace::Groups, "L1"), None);
        assert_eq!(ctx.lookup(RefNamespace::Names, "L1"), None);
    }

    #[test]
    fn test_group_namespace_is_separate() {
        let mut ctx = ResolutionContext::new();
        ctx.record_group("G1", "Thieves Guild", "grp-real");

        assert_eq!(ctx.lookup(RefNamespace::Groups, "G1"), Some(&"grp-real".to_string()));
        assert_eq!(ctx.lookup(RefNamespace::Groups, "Thieves Guild"), None);
        assert_eq!(ctx.lookup(RefNamespace::General, "G1"), Some(&"grp-real".to_string()));
    }

    #[test]
    fn test_seeded_context_and_absorb() {
        let mut pre = HashMap::new();
        pre.insert("C9".to_string(), "existing".to_string());
        let mut ctx = ResolutionContext::seeded(&pre);

        let mut routine = ResolutionContext::new();
        routine.record("C1", "Mira", "c-1");
        ctx.absorb(routine);

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["C9"], "existing");
        assert_eq!(ctx.lookup(RefNamespace::Names, "Mira"), Some(&"c-1".to_string()));
    }

    #[test]
    fn test_blank_names_are_not_recorded() {
        let mut ctx = ResolutionContext::new();
        ctx.record("X1", "  ", "x-1");
        assert!(ctx.by_name.is_empty());
    }
}

use futures::future::{join_all, try_join_all};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::sync::Arc;

use crate::error::{TemplateError, TemplateResult};
use crate::logic::normalize::{normalize_entity, DocumentDecomposer, FrontmatterDecomposer};
use crate::logic::resolve::{empty_relationships, resolve_links};
use crate::logic::substitute::{SubstitutionOptions, VariableSubstitution};
use crate::logic::validate::TemplateValidator;
use crate::model::{
    generate_id, ApplicationResult, ApplyOptions, EntitySlots, EntityType, Id, MergeMode, Record,
    ResolutionContext, Template, TemplateEntity, UnresolvedReference,
};
use crate::store::traits::Store;

/// A record prepared for the run, still holding its raw template references
#[derive(Debug, Clone)]
struct Draft {
    record: Record,
    links: Map<String, Value>,
}

/// Records of one type created by an independent routine, with the ids it assigned
struct TypeBatch {
    entity_type: EntityType,
    drafts: Vec<Draft>,
    ids: ResolutionContext,
}

/// Records written during a run, so a failed run can clean up after itself
#[derive(Debug, Default)]
struct WriteLog {
    written: Vec<(EntityType, Id)>,
}

/// Instantiates template bundles into a story.
///
/// Every call works on its own `ResolutionContext`; an applicator can be shared
/// between concurrent callers.
pub struct TemplateApplicator<S: Store> {
    store: Arc<S>,
    decomposer: Arc<dyn DocumentDecomposer>,
}

impl<S: Store> TemplateApplicator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            decomposer: Arc::new(FrontmatterDecomposer),
        }
    }

    pub fn with_decomposer(mut self, decomposer: Arc<dyn DocumentDecomposer>) -> Self {
        self.decomposer = decomposer;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Load a stored bundle and apply it
    pub async fn apply_stored_template(
        &self,
        template_id: &Id,
        options: ApplyOptions,
    ) -> ApplicationResult {
        match self.store.get_template(template_id).await {
            Ok(Some(template)) => self.apply_template(&template, options).await,
            Ok(None) => ApplicationResult::failed(format!("Template '{}' not found", template_id)),
            Err(e) => ApplicationResult::failed(format!(
                "Failed to load template '{}': {:#}",
                template_id, e
            )),
        }
    }

    /// Apply a bundle to the target story. Never fails: problems are reported
    /// through the returned result.
    pub async fn apply_template(
        &self,
        template: &Template,
        options: ApplyOptions,
    ) -> ApplicationResult {
        let mut result = ApplicationResult::new();
        let mut log = WriteLog::default();

        info!(
            "Applying template '{}' ({}) to story '{}'",
            template.name, template.id, options.target_story_id
        );

        match self.run(template, &options, &mut result, &mut log).await {
            Ok(()) => {
                result.success = true;
                if let Err(e) = self.store.increment_template_usage(&template.id).await {
                    warn!("Could not update usage count of '{}': {:#}", template.id, e);
                    result
                        .warnings
                        .push(format!("Usage count was not updated: {:#}", e));
                }
                info!("{}", result.summary());
            }
            Err(e) => {
                warn!("Template '{}' failed to apply: {}", template.id, e);
                let compensate = match &e {
                    TemplateError::Persist { .. } => options.rollback_on_failure,
                    _ => true,
                };
                if !matches!(e, TemplateError::Persist { .. }) {
                    result.created = EntitySlots::default();
                }
                if compensate && !log.written.is_empty() {
                    self.roll_back(&options.target_story_id, &log, &mut result.warnings)
                        .await;
                }
                result.success = false;
                result.error = Some(e.to_string());
            }
        }

        result
    }

    async fn run(
        &self,
        template: &Template,
        options: &ApplyOptions,
        result: &mut ApplicationResult,
        log: &mut WriteLog,
    ) -> TemplateResult<()> {
        let structure = TemplateValidator::validate_structure(template);
        if !structure.is_valid {
            return Err(TemplateError::Validation(structure.errors));
        }
        result.warnings.extend(structure.warnings);

        let mut ctx = ResolutionContext::seeded(&options.id_map);
        for group in &template.entities.groups {
            if let Some(real_id) = options.id_map.get(&group.template_id) {
                ctx.seed_group(&group.template_id, real_id);
            }
        }

        let template = self.substitute_variables(template, options, &mut result.warnings)?;

        // Attribute blocks may only parse once their placeholders are filled in
        let references =
            TemplateValidator::validate_references(&template, self.decomposer.as_ref());
        if !references.is_valid {
            return Err(TemplateError::Validation(references.errors));
        }
        result.warnings.extend(references.warnings);

        let selected = Self::select_entities(&template, options);
        debug!(
            "Selected {} of {} template entities",
            selected.len(),
            template.entities.len()
        );

        let mut groups = self.create_groups(selected.get(EntityType::Group), options, &mut ctx)?;
        for draft in &groups {
            self.persist(EntityType::Group, &draft.record).await?;
            log.written.push((EntityType::Group, draft.record.id.clone()));
        }

        let batches = try_join_all(
            EntityType::ALL
                .into_iter()
                .filter(|t| !t.is_group() && !selected.get(*t).is_empty())
                .map(|t| self.create_type(t, selected.get(t), options)),
        )
        .await?;

        let mut others: Vec<(EntityType, Vec<Draft>)> = Vec::with_capacity(batches.len());
        for batch in batches {
            ctx.absorb(batch.ids);
            others.push((batch.entity_type, batch.drafts));
        }

        if options.merge_relationships {
            Self::link_drafts(EntityType::Group, &mut groups, &ctx, result);
            for (entity_type, drafts) in others.iter_mut() {
                Self::link_drafts(*entity_type, drafts, &ctx, result);
            }
            if !result.unresolved_references.is_empty() {
                result.warnings.push(format!(
                    "{} relationship reference(s) matched no created record and were kept as written",
                    result.unresolved_references.len()
                ));
            }
        } else {
            debug!("Relationship population skipped by request");
        }

        // Groups only need a second write when linking gave them relationships
        let relinked_groups: Vec<Record> = groups
            .iter()
            .filter(|d| d.record.has_relationships())
            .map(|d| d.record.clone())
            .collect();

        result.created.groups = groups.into_iter().map(|d| d.record).collect();
        for (entity_type, drafts) in others {
            *result.created.get_mut(entity_type) = drafts.into_iter().map(|d| d.record).collect();
        }

        result.id_map = ctx.snapshot();

        let pending: Vec<(EntityType, &Record)> = result
            .created
            .iter()
            .filter(|(t, _)| !t.is_group())
            .chain(relinked_groups.iter().map(|r| (EntityType::Group, r)))
            .collect();
        self.persist_all(&pending, log).await
    }

    /// Fill in `{{variables}}` across every entity slot. Borrows the bundle
    /// unchanged when there is nothing to substitute.
    fn substitute_variables<'a>(
        &self,
        template: &'a Template,
        options: &ApplyOptions,
        warnings: &mut Vec<String>,
    ) -> TemplateResult<Cow<'a, Template>> {
        if template.variables.is_empty() || options.variable_values.is_empty() {
            return Ok(Cow::Borrowed(template));
        }

        let values =
            VariableSubstitution::effective_values(&template.variables, &options.variable_values);
        let check = VariableSubstitution::validate_variables(&template.variables, &values);
        if !check.is_valid {
            warnings.push(format!(
                "No value supplied for variable(s): {}",
                check.missing.join(", ")
            ));
        }

        let entities = serde_json::to_value(&template.entities)?;
        let substituted = VariableSubstitution::substitute(
            &entities,
            &values,
            SubstitutionOptions {
                strict: options.strict_variables,
            },
        );
        warnings.extend(substituted.warnings);
        if !substituted.errors.is_empty() {
            if options.strict_variables {
                return Err(TemplateError::Substitution(substituted.errors));
            }
            warnings.extend(substituted.errors);
        }

        let mut applied = template.clone();
        applied.entities = serde_json::from_value(substituted.value)?;
        Ok(Cow::Owned(applied))
    }

    /// Keep only the entities the caller selected. In merge mode, entities that
    /// are already mapped to existing records are not recreated.
    fn select_entities<'a>(
        template: &'a Template,
        options: &ApplyOptions,
    ) -> EntitySlots<&'a TemplateEntity> {
        let mut selected = EntitySlots::default();
        for (entity_type, entity) in template.entities.iter() {
            if !options.is_selected(entity_type, &entity.template_id) {
                continue;
            }
            if options.mode == MergeMode::Merge && options.id_map.contains_key(&entity.template_id)
            {
                debug!(
                    "Keeping existing record for {} '{}'",
                    entity_type, entity.template_id
                );
                continue;
            }
            selected.get_mut(entity_type).push(entity);
        }
        selected
    }

    /// Groups are created first and one at a time, since every other type
    /// refers to them by real id
    fn create_groups(
        &self,
        entities: &[&TemplateEntity],
        options: &ApplyOptions,
        ctx: &mut ResolutionContext,
    ) -> TemplateResult<Vec<Draft>> {
        let mut drafts = Vec::with_capacity(entities.len());
        for entity in entities {
            let draft = self.prepare(EntityType::Group, entity, options)?;
            ctx.record_group(&entity.template_id, &draft.record.name, &draft.record.id);
            drafts.push(draft);
        }
        Ok(drafts)
    }

    async fn create_type(
        &self,
        entity_type: EntityType,
        entities: &[&TemplateEntity],
        options: &ApplyOptions,
    ) -> TemplateResult<TypeBatch> {
        let mut ids = ResolutionContext::new();
        let mut drafts = Vec::with_capacity(entities.len());
        for entity in entities {
            let draft = self.prepare(entity_type, entity, options)?;
            ids.record(&entity.template_id, &draft.record.name, &draft.record.id);
            drafts.push(draft);
        }
        debug!("Prepared {} {}", drafts.len(), entity_type.slot_name());
        Ok(TypeBatch {
            entity_type,
            drafts,
            ids,
        })
    }

    /// Normalize, apply overrides, assign the real id. Relationship fields start empty.
    fn prepare(
        &self,
        entity_type: EntityType,
        entity: &TemplateEntity,
        options: &ApplyOptions,
    ) -> TemplateResult<Draft> {
        let creation_error = |cause: anyhow::Error| TemplateError::Creation {
            entity_type,
            template_id: entity.template_id.clone(),
            cause,
        };

        let mut normalized = normalize_entity(entity_type, entity, self.decomposer.as_ref())
            .map_err(creation_error)?;

        let overrides = options.entity_overrides.get(&entity.template_id);
        if let Some(overrides) = overrides {
            normalized.apply_overrides(overrides);
        }

        let id = overrides
            .and_then(|o| o.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .or_else(|| options.id_map.get(&entity.template_id).cloned())
            .unwrap_or_else(generate_id);

        let mut record = Record::new(
            id,
            entity_type,
            options.target_story_id.clone(),
            normalized.name,
        );
        record.fields = normalized.fields;
        record.sections = normalized.sections;
        record.relationships = empty_relationships(entity_type);
        record.template_id = Some(entity.template_id.clone());

        Ok(Draft {
            record,
            links: normalized.links,
        })
    }

    fn link_drafts(
        entity_type: EntityType,
        drafts: &mut [Draft],
        ctx: &ResolutionContext,
        result: &mut ApplicationResult,
    ) {
        for draft in drafts.iter_mut() {
            let resolution = resolve_links(entity_type, &draft.links, ctx);
            draft.record.relationships = resolution.relationships;
            draft.record.touch();
            for (field, entry) in resolution.rejected {
                warn!(
                    "Unreadable {} entry on {} '{}': {}",
                    field, entity_type, draft.record.name, entry
                );
                result.warnings.push(format!(
                    "Dropped unreadable {} entry {} on {} '{}'",
                    field, entry, entity_type, draft.record.name
                ));
            }
            result
                .unresolved_references
                .extend(
                    resolution
                        .unresolved
                        .into_iter()
                        .map(|(field, value)| UnresolvedReference {
                            entity_type,
                            record_id: draft.record.id.clone(),
                            field,
                            value,
                        }),
                );
        }
    }

    async fn persist(&self, entity_type: EntityType, record: &Record) -> TemplateResult<()> {
        self.store
            .save_record(entity_type, record)
            .await
            .map_err(|cause| TemplateError::Persist {
                entity_type,
                record_id: record.id.clone(),
                cause,
            })
    }

    /// Save every record concurrently. Each save stands alone: a failure does not
    /// stop the others, and the first failure is reported once all have finished.
    async fn persist_all(
        &self,
        records: &[(EntityType, &Record)],
        log: &mut WriteLog,
    ) -> TemplateResult<()> {
        let outcomes = join_all(records.iter().map(|(entity_type, record)| async move {
            (
                *entity_type,
                record.id.clone(),
                self.persist(*entity_type, record).await,
            )
        }))
        .await;

        let mut first_error = None;
        for (entity_type, id, outcome) in outcomes {
            match outcome {
                Ok(()) => log.written.push((entity_type, id)),
                Err(e) => {
                    warn!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Best-effort removal of everything this run wrote
    async fn roll_back(&self, story_id: &Id, log: &WriteLog, warnings: &mut Vec<String>) {
        info!("Removing {} record(s) written by the failed run", log.written.len());
        let outcomes = join_all(log.written.iter().map(|(entity_type, id)| async move {
            (
                id,
                self.store.delete_record(story_id, *entity_type, id).await,
            )
        }))
        .await;

        for (id, outcome) in outcomes {
            if let Err(e) = outcome {
                warnings.push(format!("Could not remove record '{}': {:#}", id, e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RelationshipValue, TemplateVariable};
    use crate::store::{MemoryStore, RecordStore};
    use serde_json::json;
    use std::collections::HashSet;

    fn applicator() -> TemplateApplicator<MemoryStore> {
        TemplateApplicator::new(Arc::new(MemoryStore::new()))
    }

    fn guild_template() -> Template {
        let mut template = Template::new("tpl-guild", "Thieves Guild");
        template
            .entities
            .groups
            .push(TemplateEntity::new("G1").with_field("name", json!("Thieves Guild")));
        template.entities.characters.push(
            TemplateEntity::new("C1")
                .with_field("name", json!("Mira Vex"))
                .with_field("groups", json!(["G1"])),
        );
        template
    }

    #[tokio::test]
    async fn test_group_reference_resolves_to_real_id() {
        let applicator = applicator();
        let result = applicator
            .apply_template(&guild_template(), ApplyOptions::new("story-1"))
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.created.groups.len(), 1);
        assert_eq!(result.created.characters.len(), 1);

        let group_id = result.created.groups[0].id.clone();
        assert_ne!(group_id, "G1");
        assert_eq!(
            result.created.characters[0].relationship("groups"),
            Some(&RelationshipValue::Ids(vec![group_id.clone()]))
        );
        assert_eq!(result.id_map["G1"], group_id);
        assert_eq!(applicator.store().record_count(), 2);
    }

    #[tokio::test]
    async fn test_ids_are_fresh_per_run() {
        let applicator = applicator();
        let first = applicator
            .apply_template(&guild_template(), ApplyOptions::new("story-1"))
            .await;
        let second = applicator
            .apply_template(&guild_template(), ApplyOptions::new("story-1"))
            .await;

        let ids: HashSet<_> = first
            .created
            .iter()
            .chain(second.created.iter())
            .map(|(_, r)| r.id.clone())
            .collect();
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn test_variables_are_substituted_before_creation() {
        let mut template = guild_template();
        template.entities.characters[0]
            .fields
            .insert("name".to_string(), json!("{{heroName}}"));
        template.variables.push(TemplateVariable::text("heroName"));

        let result = applicator()
            .apply_template(
                &template,
                ApplyOptions::new("story-1").with_variable("heroName", json!("Aria")),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.created.characters[0].name, "Aria");
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[tokio::test]
    async fn test_document_placeholders_are_filled_before_reading() {
        let mut template = guild_template();
        let mut hero = TemplateEntity::new("C1");
        hero.yaml_content = Some("name: {{heroName}}\nrole: hero".to_string());
        template.entities.characters[0] = hero;
        template.variables.push(TemplateVariable::text("heroName"));

        let result = applicator()
            .apply_template(
                &template,
                ApplyOptions::new("story-1").with_variable("heroName", json!("Aria")),
            )
            .await;

        assert!(result.success, "{:?}", result.error);
        let hero = &result.created.characters[0];
        assert_eq!(hero.name, "Aria");
        assert_eq!(hero.fields["role"], json!("hero"));
    }

    #[tokio::test]
    async fn test_member_entries_keep_extra_keys_and_report_unreadable_ones() {
        let mut template = guild_template();
        template.entities.groups[0].fields.insert(
            "members".to_string(),
            json!([
                {"name": "Mira Vex", "rank": 2},
                {"name": "Bo", "rank": "x", "joinDate": "Year 3", "notes": "n"},
                {"rank": "first"}
            ]),
        );

        let result = applicator()
            .apply_template(&template, ApplyOptions::new("story-1"))
            .await;

        assert!(result.success, "{:?}", result.error);
        let mira_id = result.created.characters[0].id.clone();
        let Some(RelationshipValue::Members(members)) =
            result.created.groups[0].relationship("members")
        else {
            panic!("expected memberships");
        };
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].name, mira_id);
        assert_eq!(members[0].rank.as_deref(), Some("2"));
        assert_eq!(members[1].name, "Bo");
        assert_eq!(members[1].extra["joinDate"], json!("Year 3"));
        assert_eq!(members[1].extra["notes"], json!("n"));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("Dropped unreadable members entry")));
    }

    #[tokio::test]
    async fn test_strict_variables_fail_the_run() {
        let mut template = guild_template();
        template.entities.characters[0]
            .fields
            .insert("title".to_string(), json!("{{rank}} of {{town}}"));
        template.variables.push(TemplateVariable::text("rank"));

        let mut options = ApplyOptions::new("story-1").with_variable("rank", json!("Master"));
        options.strict_variables = true;
        let applicator = applicator();
        let result = applicator.apply_template(&template, options).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("town"));
        assert_eq!(applicator.store().record_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_template_creates_nothing() {
        let mut template = guild_template();
        template.name = String::new();

        let applicator = applicator();
        let result = applicator
            .apply_template(&template, ApplyOptions::new("story-1"))
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("name"));
        assert!(result.created.is_empty());
        assert_eq!(applicator.store().record_count(), 0);
    }

    #[tokio::test]
    async fn test_overrides_and_skipped_relationships() {
        let mut options = ApplyOptions::new("story-1");
        let mut overrides = Map::new();
        overrides.insert("id".to_string(), json!("mira-fixed"));
        overrides.insert("alias".to_string(), json!("The Cat"));
        options.entity_overrides.insert("C1".to_string(), overrides);
        options.merge_relationships = false;

        let result = applicator().apply_template(&guild_template(), options).await;

        assert!(result.success);
        let mira = &result.created.characters[0];
        assert_eq!(mira.id, "mira-fixed");
        assert_eq!(mira.fields["alias"], json!("The Cat"));
        assert_eq!(mira.relationship("groups"), Some(&RelationshipValue::Ids(Vec::new())));
    }

    #[tokio::test]
    async fn test_merge_mode_keeps_pre_mapped_records() {
        let mut options = ApplyOptions::new("story-1");
        options
            .id_map
            .insert("G1".to_string(), "existing-guild".to_string());

        let result = applicator().apply_template(&guild_template(), options).await;

        assert!(result.success);
        assert!(result.created.groups.is_empty());
        assert_eq!(
            result.created.characters[0].relationship_ids("groups"),
            vec!["existing-guild"]
        );
        assert_eq!(result.id_map["G1"], "existing-guild");
    }

    #[tokio::test]
    async fn test_replace_mode_reuses_pre_mapped_ids() {
        let mut options = ApplyOptions::new("story-1");
        options.mode = MergeMode::Replace;
        options
            .id_map
            .insert("G1".to_string(), "existing-guild".to_string());

        let applicator = applicator();
        let result = applicator.apply_template(&guild_template(), options).await;

        assert!(result.success);
        assert_eq!(result.created.groups[0].id, "existing-guild");
        assert_eq!(
            result.created.characters[0].relationship_ids("groups"),
            vec!["existing-guild"]
        );
        let stored = applicator
            .store()
            .get_record(
                &"story-1".to_string(),
                EntityType::Group,
                &"existing-guild".to_string(),
            )
            .await
            .unwrap();
        assert!(stored.is_some());
    }
}

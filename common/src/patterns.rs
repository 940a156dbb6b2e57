use serde::{Deserialize, Serialize};

use crate::{
    error::PatternError,
    spotlight,
    types::{Direction, ParameterSet, PlanType, ZoneObservation},
};

pub const MAX_PATTERN_SLOTS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub id: String,
    pub name: String,
    pub parameters: ParameterSet,
    #[serde(default)]
    pub plan_type: Option<PlanType>,
    #[serde(default)]
    pub original_colors: Option<String>,
}

/// Stable key for "the same effective pattern": the type plus every field that
/// differs from its default.
pub fn pattern_id(params: &ParameterSet) -> String {
    let mut id = slug(&params.pattern_type);
    if params.direction != Direction::F {
        id.push_str("-r");
    }
    if params.speed != 0 {
        id.push_str(&format!("-s{}", params.speed));
    }
    if params.num_colors != 1 {
        id.push_str(&format!("-n{}", params.num_colors));
    }
    if let Some([r, g, b]) = params.first_lit_color() {
        id.push_str(&format!("-c{r:02x}{g:02x}{b:02x}"));
    }
    id
}

fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("pattern");
    }
    out
}

/// Where a pattern ended up after [`PatternStore::capture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Inserted(usize),
    Updated(usize),
}

impl CaptureOutcome {
    pub fn slot(self) -> usize {
        match self {
            Self::Inserted(slot) | Self::Updated(slot) => slot,
        }
    }
}

/// Fixed-capacity slot list. Slot indices are stable: deleting a pattern only
/// strips trailing empties, interior holes are kept and reused by inserts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Option<Pattern>>", into = "Vec<Option<Pattern>>")]
pub struct PatternStore {
    slots: Vec<Option<Pattern>>,
}

impl From<Vec<Option<Pattern>>> for PatternStore {
    fn from(slots: Vec<Option<Pattern>>) -> Self {
        Self::from_slots(slots)
    }
}

impl From<PatternStore> for Vec<Option<Pattern>> {
    fn from(store: PatternStore) -> Self {
        store.slots
    }
}

impl PatternStore {
    pub fn from_slots(mut slots: Vec<Option<Pattern>>) -> Self {
        slots.truncate(MAX_PATTERN_SLOTS);
        let mut store = Self { slots };
        store.compact();
        store
    }

    pub fn slots(&self) -> &[Option<Pattern>] {
        &self.slots
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.patterns().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<&Pattern> {
        self.patterns().find(|pattern| pattern.name == name)
    }

    pub fn first(&self) -> Option<&Pattern> {
        self.patterns().next()
    }

    /// Stored pattern whose underlying type matches what the controller reports.
    pub fn matching_type(&self, pattern_type: &str) -> Option<&Pattern> {
        self.patterns()
            .find(|pattern| pattern.parameters.pattern_type.eq_ignore_ascii_case(pattern_type))
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names = self
            .patterns()
            .map(|pattern| pattern.name.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Store the observed pattern. Re-capturing an existing id refreshes its
    /// parameters and plan type but keeps whatever name the user gave it.
    pub fn capture(
        &mut self,
        observation: &ZoneObservation,
        parameters: ParameterSet,
    ) -> Result<CaptureOutcome, PatternError> {
        parameters.validate()?;
        let default_name = if observation.pattern_name.trim().is_empty() {
            parameters.pattern_type.clone()
        } else {
            observation.pattern_name.trim().to_string()
        };
        self.upsert(default_name, parameters)
    }

    /// Load a built-in pattern through the same path as capture.
    pub fn load_predefined(&mut self, name: &str, parameters: ParameterSet) -> Result<CaptureOutcome, PatternError> {
        parameters.validate()?;
        self.upsert(name.to_string(), parameters)
    }

    fn upsert(&mut self, default_name: String, parameters: ParameterSet) -> Result<CaptureOutcome, PatternError> {
        let id = pattern_id(&parameters);
        let plan_type = PlanType::for_pattern_type(&parameters.pattern_type);
        let original_colors = (plan_type == PlanType::Spotlight).then(|| parameters.colors.clone());

        if let Some(slot) = self.position(|pattern| pattern.id == id) {
            if let Some(existing) = self.slots[slot].as_mut() {
                existing.parameters = parameters;
                existing.plan_type = Some(plan_type);
                existing.original_colors = original_colors;
            }
            return Ok(CaptureOutcome::Updated(slot));
        }

        let name = self.unique_name(&default_name);
        let pattern = Pattern {
            id,
            name,
            parameters,
            plan_type: Some(plan_type),
            original_colors,
        };

        if let Some(slot) = self.slots.iter().position(Option::is_none) {
            self.slots[slot] = Some(pattern);
            return Ok(CaptureOutcome::Inserted(slot));
        }
        if self.slots.len() >= MAX_PATTERN_SLOTS {
            return Err(PatternError::Capacity(MAX_PATTERN_SLOTS));
        }
        self.slots.push(Some(pattern));
        Ok(CaptureOutcome::Inserted(self.slots.len() - 1))
    }

    fn unique_name(&self, base: &str) -> String {
        if self.get(base).is_none() {
            return base.to_string();
        }
        (2..)
            .map(|suffix| format!("{base} {suffix}"))
            .find(|candidate| self.get(candidate).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    /// Parameters ready to send for `name` on `zone`. Spotlight patterns are
    /// expanded onto `max_leds` LEDs following `led_plan`.
    pub fn resolve(
        &mut self,
        name: &str,
        zone: u8,
        led_plan: &str,
        max_leds: usize,
    ) -> Result<ParameterSet, PatternError> {
        let slot = self
            .position(|pattern| pattern.name == name)
            .ok_or_else(|| PatternError::NotFound(name.to_string()))?;
        let Some(pattern) = self.slots[slot].as_mut() else {
            return Err(PatternError::NotFound(name.to_string()));
        };

        // Older entries were stored before plan types existed.
        let derived = PlanType::for_pattern_type(&pattern.parameters.pattern_type);
        let plan_type = *pattern.plan_type.get_or_insert(derived);

        let mut params = pattern.parameters.clone();
        params.zone = zone;

        if plan_type == PlanType::Spotlight {
            if pattern.original_colors.is_none() {
                pattern.original_colors = Some(pattern.parameters.colors.clone());
            }
            let original = pattern.original_colors.clone().unwrap_or_default();
            let triplets = spotlight::triplet_count(&original);
            params.colors = spotlight::remap(&original, led_plan, triplets, max_leds);
            params.num_colors = spotlight::triplet_count(&params.colors);
        }

        params.validate()?;
        Ok(params)
    }

    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<bool, PatternError> {
        let new_name = new_name.trim();
        if old_name == new_name {
            return Ok(false);
        }
        let Some(slot) = self.position(|pattern| pattern.name == old_name) else {
            return Ok(false);
        };
        if self.get(new_name).is_some() {
            return Err(PatternError::NameTaken(new_name.to_string()));
        }
        if let Some(pattern) = self.slots[slot].as_mut() {
            pattern.name = new_name.to_string();
        }
        Ok(true)
    }

    pub fn delete(&mut self, name: &str) -> Option<Pattern> {
        let slot = self.position(|pattern| pattern.name == name)?;
        let removed = self.slots[slot].take();
        self.compact();
        removed
    }

    fn compact(&mut self) {
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
    }

    fn position(&self, predicate: impl Fn(&Pattern) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(&predicate))
    }
}

/// Built-in patterns offered on a fresh install.
pub fn predefined(zone: u8) -> Vec<(&'static str, ParameterSet)> {
    let make = |pattern_type: &str, colors: &str, direction: Direction, speed: u8, gap: u8| {
        ParameterSet {
            pattern_type: pattern_type.to_string(),
            zone,
            num_zones: 1,
            num_colors: spotlight::triplet_count(colors),
            colors: colors.to_string(),
            direction,
            speed,
            gap,
            other: 0,
            pause: 0,
        }
    };

    vec![
        ("Warm White", make("stationary", "255,170,90", Direction::F, 0, 0)),
        (
            "Candy Cane",
            make("march", "255,0,0,255,255,255", Direction::F, 3, 1),
        ),
        (
            "Holiday Chase",
            make("chase", "255,0,0,0,255,0", Direction::R, 6, 2),
        ),
        ("White Spotlight", make("spotlight", "255,255,255", Direction::F, 0, 0)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(pattern_type: &str, colors: &str) -> ParameterSet {
        ParameterSet {
            pattern_type: pattern_type.to_string(),
            zone: 1,
            num_zones: 1,
            num_colors: spotlight::triplet_count(colors),
            colors: colors.to_string(),
            direction: Direction::F,
            speed: 0,
            gap: 0,
            other: 0,
            pause: 0,
        }
    }

    fn observed(name: &str) -> ZoneObservation {
        ZoneObservation {
            pattern_name: name.to_string(),
            is_on: true,
        }
    }

    #[test]
    fn id_skips_default_fields() {
        assert_eq!(pattern_id(&params("Stationary", "0,0,0")), "stationary");

        let mut march = params("march", "0,0,0,255,0,16");
        march.direction = Direction::R;
        march.speed = 4;
        assert_eq!(pattern_id(&march), "march-r-s4-n2-cff0010");
    }

    #[test]
    fn recapture_keeps_user_name() {
        let mut store = PatternStore::default();
        let first = store.capture(&observed("march"), params("march", "255,0,0")).unwrap();
        assert_eq!(first, CaptureOutcome::Inserted(0));
        store.rename("march", "Porch").unwrap();

        let mut changed = params("march", "255,0,0");
        changed.gap = 9;
        let second = store.capture(&observed("march"), changed).unwrap();

        assert_eq!(second, CaptureOutcome::Updated(0));
        assert_eq!(store.len(), 1);
        let stored = store.get("Porch").unwrap();
        assert_eq!(stored.parameters.gap, 9);
        assert_eq!(store.list_names(), vec!["Porch".to_string()]);
    }

    #[test]
    fn capture_names_avoid_collisions() {
        let mut store = PatternStore::default();
        store.capture(&observed("march"), params("march", "255,0,0")).unwrap();
        store.capture(&observed("march"), params("march", "0,255,0")).unwrap();
        store.capture(&observed("march"), params("march", "0,0,255")).unwrap();

        assert_eq!(
            store.list_names(),
            vec!["march".to_string(), "march 2".to_string(), "march 3".to_string()]
        );
    }

    #[test]
    fn capture_fails_when_slots_exhausted() {
        let mut store = PatternStore::default();
        for value in 0..MAX_PATTERN_SLOTS {
            let colors = format!("{},{},1", value % 256, value / 256);
            store.capture(&observed("fade"), params("fade", &colors)).unwrap();
        }

        let result = store.capture(&observed("fade"), params("fade", "9,9,9"));
        assert_eq!(result, Err(PatternError::Capacity(MAX_PATTERN_SLOTS)));
        assert_eq!(store.len(), MAX_PATTERN_SLOTS);
    }

    #[test]
    fn delete_strips_only_trailing_empties() {
        let mut store = PatternStore::default();
        for (name, colors) in [("a", "1,0,0"), ("b", "2,0,0"), ("c", "3,0,0")] {
            store.load_predefined(name, params("fade", colors)).unwrap();
        }

        store.delete("b");
        assert_eq!(store.slots().len(), 3);
        assert!(store.slots()[1].is_none());

        store.delete("c");
        assert_eq!(store.slots().len(), 1);
        assert_eq!(store.list_names(), vec!["a".to_string()]);
        assert!(store.get("c").is_none());

        // the freed interior slot is reused first
        store.load_predefined("d", params("fade", "4,0,0")).unwrap();
        assert_eq!(store.slots()[0].as_ref().unwrap().name, "a");
        assert_eq!(store.slots()[1].as_ref().unwrap().name, "d");
    }

    #[test]
    fn stored_slots_are_bounded_and_compacted_on_load() {
        let mut store = PatternStore::default();
        store.load_predefined("a", params("fade", "1,0,0")).unwrap();
        let mut raw = serde_json::to_value(&store).unwrap();
        let slots = raw.as_array_mut().unwrap();
        slots.push(serde_json::Value::Null);
        slots.push(serde_json::Value::Null);

        let loaded: PatternStore = serde_json::from_value(raw).unwrap();
        assert_eq!(loaded.slots().len(), 1);

        let oversized = vec![store.slots()[0].clone(); MAX_PATTERN_SLOTS + 5];
        let oversized = serde_json::to_value(oversized).unwrap();
        let loaded: PatternStore = serde_json::from_value(oversized).unwrap();
        assert_eq!(loaded.slots().len(), MAX_PATTERN_SLOTS);
    }

    #[test]
    fn rename_rules() {
        let mut store = PatternStore::default();
        store.load_predefined("a", params("fade", "1,0,0")).unwrap();
        store.load_predefined("b", params("fade", "2,0,0")).unwrap();

        assert_eq!(store.rename("missing", "x"), Ok(false));
        assert_eq!(store.rename("a", "a"), Ok(false));
        assert_eq!(store.rename("a", "b"), Err(PatternError::NameTaken("b".to_string())));
        assert_eq!(store.rename("a", "c"), Ok(true));
        assert_eq!(store.list_names(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn resolve_remaps_spotlight_patterns() {
        let mut store = PatternStore::default();
        store
            .load_predefined("spot", params("spotlight", "10,20,30,40,50,60"))
            .unwrap();

        let resolved = store.resolve("spot", 4, "1,3", 4).unwrap();
        assert_eq!(resolved.zone, 4);
        assert_eq!(resolved.colors, "10,20,30,0,0,0,10,20,30,0,0,0");
        assert_eq!(resolved.num_colors, 4);

        // the stored palette is untouched
        assert_eq!(store.get("spot").unwrap().parameters.colors, "10,20,30,40,50,60");
    }

    #[test]
    fn resolve_derives_missing_plan_type_once() {
        let mut store = PatternStore::from_slots(vec![Some(Pattern {
            id: "spotlight".to_string(),
            name: "legacy".to_string(),
            parameters: params("spotlight", "1,2,3"),
            plan_type: None,
            original_colors: None,
        })]);

        let resolved = store.resolve("legacy", 2, "2", 2).unwrap();
        assert_eq!(resolved.colors, "0,0,0,1,2,3");

        let stored = store.get("legacy").unwrap();
        assert_eq!(stored.plan_type, Some(PlanType::Spotlight));
        assert_eq!(stored.original_colors.as_deref(), Some("1,2,3"));
    }

    #[test]
    fn resolve_unknown_name_fails() {
        let mut store = PatternStore::default();
        assert_eq!(
            store.resolve("nope", 1, "", 10),
            Err(PatternError::NotFound("nope".to_string()))
        );
    }

    #[test]
    fn predefined_catalogue_is_valid() {
        let mut store = PatternStore::default();
        for (name, params) in predefined(3) {
            store.load_predefined(name, params).unwrap();
        }
        assert_eq!(store.len(), 4);
        assert_eq!(
            store.get("White Spotlight").unwrap().plan_type,
            Some(PlanType::Spotlight)
        );
    }
}

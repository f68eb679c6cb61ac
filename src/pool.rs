//! Template Pool - label lookup and inheritance
//!
//! The pool borrows the faces it knows about; whoever built them owns them.
//! Separate pools never see each other's templates.

use std::collections::{BTreeMap, BTreeSet};

use crate::cardface::CardFace;
use crate::error::{EngineError, EngineResult};
use crate::value::Value;

/// A face's inheritance chain, flattened.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition<'a> {
    /// Every transitively referenced template, dependencies before dependents.
    pub templates: Vec<&'a CardFace>,
    /// Inherited steps in template order, then the face's own steps.
    pub steps: Vec<&'a Value>,
    /// Explicit size, else the last-listed template's effective size.
    pub size: Option<(u32, u32)>,
}

impl Composition<'_> {
    pub fn template_labels(&self) -> Vec<&str> {
        self.templates.iter().map(|t| t.display_label()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplatePool<'f> {
    templates: BTreeMap<String, &'f CardFace>,
}

impl<'f> TemplatePool<'f> {
    pub fn new() -> Self {
        Self {
            templates: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, face: &'f CardFace) -> EngineResult<()> {
        let label = face.label.as_ref().ok_or(EngineError::UnlabelledTemplate)?;
        if self.templates.contains_key(label) {
            return Err(EngineError::DuplicateLabel(label.clone()));
        }
        self.templates.insert(label.clone(), face);
        Ok(())
    }

    pub fn lookup(&self, label: &str) -> Option<&'f CardFace> {
        self.templates.get(label).copied()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Flatten a face's templates and steps and settle its size.
    pub fn compose<'a>(&'a self, face: &'a CardFace) -> EngineResult<Composition<'a>> {
        let mut templates = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = Vec::new();
        if let Some(label) = &face.label {
            stack.push(label.clone());
        }
        self.collect_templates(face, &mut stack, &mut seen, &mut templates)?;

        let steps = templates
            .iter()
            .flat_map(|&t| t.steps.iter())
            .chain(face.steps.iter())
            .collect();

        let size = Self::effective_size(face, &templates);

        Ok(Composition {
            templates,
            steps,
            size,
        })
    }

    fn resolve_label(&self, label: &str) -> EngineResult<&'f CardFace> {
        self.lookup(label)
            .ok_or_else(|| EngineError::UnknownTemplate(label.to_string()))
    }

    fn collect_templates<'a>(
        &'a self,
        face: &'a CardFace,
        stack: &mut Vec<String>,
        seen: &mut BTreeSet<String>,
        out: &mut Vec<&'a CardFace>,
    ) -> EngineResult<()> {
        for label in &face.templates_labels {
            if stack.contains(label) {
                let mut chain = stack.clone();
                chain.push(label.clone());
                return Err(EngineError::TemplateCycle { chain });
            }
            if seen.contains(label) {
                continue;
            }
            let template = self.resolve_label(label)?;
            stack.push(label.clone());
            self.collect_templates(template, stack, seen, out)?;
            stack.pop();
            seen.insert(label.clone());
            out.push(template);
        }
        Ok(())
    }

    /// Sizes settle in dependency order, so every template is visited once.
    fn effective_size(face: &CardFace, templates: &[&CardFace]) -> Option<(u32, u32)> {
        let mut settled: BTreeMap<&str, Option<(u32, u32)>> = BTreeMap::new();
        for template in templates {
            let size = Self::own_or_inherited(template, &settled);
            if let Some(label) = template.label.as_deref() {
                settled.insert(label, size);
            }
        }
        Self::own_or_inherited(face, &settled)
    }

    fn own_or_inherited(
        face: &CardFace,
        settled: &BTreeMap<&str, Option<(u32, u32)>>,
    ) -> Option<(u32, u32)> {
        face.size.or_else(|| {
            face.templates_labels
                .iter()
                .rev()
                .find_map(|label| settled.get(label.as_str()).copied().flatten())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(name: &str) -> Value {
        Value::from(json!({"type": "write_to_cache", "key": name, "value": 1}))
    }

    fn step_keys(composition: &Composition<'_>) -> Vec<String> {
        composition
            .steps
            .iter()
            .map(|s| s.get("key").and_then(Value::as_str).unwrap_or("").to_string())
            .collect()
    }

    #[test]
    fn test_register_rejects_duplicate_label() {
        let a = CardFace::new().with_label("A");
        let also_a = CardFace::new().with_label("A");
        let mut pool = TemplatePool::new();
        pool.register(&a).unwrap();
        let err = pool.register(&also_a).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateLabel(ref l) if l == "A"));
        assert!(std::ptr::eq(pool.lookup("A").unwrap(), &a));
    }

    #[test]
    fn test_register_requires_label() {
        let face = CardFace::new();
        let mut pool = TemplatePool::new();
        assert!(matches!(
            pool.register(&face),
            Err(EngineError::UnlabelledTemplate)
        ));
    }

    #[test]
    fn test_compose_orders_dependencies_first_and_deduplicates() {
        let base = CardFace::new().with_label("base").with_steps(vec![step("base")]);
        let left = CardFace::new()
            .with_label("left")
            .with_templates(["base"])
            .with_steps(vec![step("left")]);
        let right = CardFace::new()
            .with_label("right")
            .with_templates(["base"])
            .with_steps(vec![step("right")]);
        let face = CardFace::new()
            .with_templates(["left", "right"])
            .with_steps(vec![step("own")]);

        let mut pool = TemplatePool::new();
        for t in [&base, &left, &right] {
            pool.register(t).unwrap();
        }

        let composition = pool.compose(&face).unwrap();
        assert_eq!(composition.template_labels(), vec!["base", "left", "right"]);
        assert_eq!(step_keys(&composition), vec!["base", "left", "right", "own"]);
    }

    #[test]
    fn test_last_listed_template_size_wins() {
        let small = CardFace::new().with_label("small").with_size(10, 10);
        let large = CardFace::new().with_label("large").with_size(100, 200);
        let sizeless = CardFace::new().with_label("sizeless");
        let mut pool = TemplatePool::new();
        for t in [&small, &large, &sizeless] {
            pool.register(t).unwrap();
        }

        let face = CardFace::new().with_templates(["small", "large", "sizeless"]);
        assert_eq!(pool.compose(&face).unwrap().size, Some((100, 200)));

        let explicit = CardFace::new()
            .with_templates(["small", "large"])
            .with_size(1, 2);
        assert_eq!(pool.compose(&explicit).unwrap().size, Some((1, 2)));

        let none = CardFace::new().with_templates(["sizeless"]);
        assert_eq!(pool.compose(&none).unwrap().size, None);
    }

    #[test]
    fn test_size_inherited_through_chain() {
        let root = CardFace::new().with_label("root").with_size(30, 40);
        let middle = CardFace::new().with_label("middle").with_templates(["root"]);
        let mut pool = TemplatePool::new();
        pool.register(&root).unwrap();
        pool.register(&middle).unwrap();

        let face = CardFace::new().with_templates(["middle"]);
        assert_eq!(pool.compose(&face).unwrap().size, Some((30, 40)));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let a = CardFace::new().with_label("A").with_templates(["B"]);
        let b = CardFace::new().with_label("B").with_templates(["A"]);
        let mut pool = TemplatePool::new();
        pool.register(&a).unwrap();
        pool.register(&b).unwrap();

        let err = pool.compose(&a).unwrap_err();
        match err {
            EngineError::TemplateCycle { chain } => assert_eq!(chain, vec!["A", "B", "A"]),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_unknown_template_is_reported() {
        let face = CardFace::new().with_templates(["missing"]);
        let pool = TemplatePool::new();
        assert!(matches!(
            pool.compose(&face),
            Err(EngineError::UnknownTemplate(ref l)) if l == "missing"
        ));
    }

    #[test]
    fn test_size_settles_quickly_through_deep_diamonds() {
        let mut faces = vec![
            CardFace::new().with_label("a0").with_size(7, 9),
            CardFace::new().with_label("b0"),
        ];
        for level in 1..40 {
            let parents = [format!("a{}", level - 1), format!("b{}", level - 1)];
            faces.push(
                CardFace::new()
                    .with_label(format!("a{level}"))
                    .with_templates(parents.clone()),
            );
            faces.push(
                CardFace::new()
                    .with_label(format!("b{level}"))
                    .with_templates(parents),
            );
        }
        let mut pool = TemplatePool::new();
        for face in &faces {
            pool.register(face).unwrap();
        }

        let face = CardFace::new().with_templates(["a39", "b39"]);
        let started = std::time::Instant::now();
        let composition = pool.compose(&face).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert_eq!(composition.size, Some((7, 9)));
        assert_eq!(composition.templates.len(), 80);
    }

    #[test]
    fn test_pools_are_isolated() {
        let template = CardFace::new().with_label("T").with_size(5, 5);
        let mut first = TemplatePool::new();
        first.register(&template).unwrap();
        let second = TemplatePool::new();

        let face = CardFace::new().with_templates(["T"]);
        assert!(first.compose(&face).is_ok());
        assert!(second.compose(&face).is_err());
    }
}

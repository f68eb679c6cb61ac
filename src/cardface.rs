//! Card Faces
//!
//! A [`CardFace`] is the declared, immutable description of one face. Everything
//! that changes while it renders lives in a [`FaceContext`], which exists only
//! for the duration of one generation.

use std::cell::{Cell, Ref, RefCell, RefMut};

use crate::pool::Composition;
use crate::raster::Canvas;
use crate::scheduler::GenerationRun;
use crate::value::{Mapping, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardFace {
    pub label: Option<String>,
    pub templates_labels: Vec<String>,
    pub steps: Vec<Value>,
    pub size: Option<(u32, u32)>,
    pub is_template: bool,
    pub do_skip_generation: bool,
}

impl CardFace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_templates<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.templates_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_steps(mut self, steps: Vec<Value>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = Some((width, height));
        self
    }

    pub fn as_template(mut self) -> Self {
        self.is_template = true;
        self
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or("<unlabelled>")
    }
}

/// The mutable state of one face while it generates.
///
/// `parent` borrows the context that triggered a nested generation; it is not
/// owned and cannot outlive that generation. Dropping the context clears the
/// cache, detaches the working canvas and forgets the parent.
pub struct FaceContext<'r> {
    run: &'r GenerationRun<'r>,
    face: &'r CardFace,
    composition: Composition<'r>,
    parent: Option<&'r FaceContext<'r>>,
    cache: RefCell<Mapping>,
    working_canvas: RefCell<Option<Canvas>>,
    depth: Cell<usize>,
}

impl<'r> FaceContext<'r> {
    pub(crate) fn new(
        run: &'r GenerationRun<'r>,
        face: &'r CardFace,
        composition: Composition<'r>,
        parent: Option<&'r FaceContext<'r>>,
    ) -> Self {
        Self {
            run,
            face,
            composition,
            parent,
            cache: RefCell::new(run.global_cache().clone()),
            working_canvas: RefCell::new(None),
            depth: Cell::new(0),
        }
    }

    pub fn run(&self) -> &'r GenerationRun<'r> {
        self.run
    }

    pub fn face(&self) -> &'r CardFace {
        self.face
    }

    pub fn composition(&self) -> &Composition<'r> {
        &self.composition
    }

    /// Size after template inheritance.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.composition.size
    }

    pub fn parent(&self) -> Option<&'r FaceContext<'r>> {
        self.parent
    }

    pub fn cache(&self) -> Ref<'_, Mapping> {
        self.cache.borrow()
    }

    pub fn cache_mut(&self) -> RefMut<'_, Mapping> {
        self.cache.borrow_mut()
    }

    pub fn working_canvas(&self) -> Option<Canvas> {
        self.working_canvas.borrow().clone()
    }

    pub(crate) fn set_working_canvas(&self, canvas: Option<Canvas>) {
        *self.working_canvas.borrow_mut() = canvas;
    }

    pub(crate) fn depth(&self) -> &Cell<usize> {
        &self.depth
    }

    /// Whether `face` is already generating somewhere up this parent chain.
    pub(crate) fn is_generating(&self, face: &CardFace) -> bool {
        std::ptr::eq(self.face, face) || self.parent.is_some_and(|p| p.is_generating(face))
    }

    /// Labels from the outermost generation down to this one.
    pub(crate) fn lineage(&self) -> Vec<String> {
        let mut labels = self.parent.map(|p| p.lineage()).unwrap_or_default();
        labels.push(self.face.display_label().to_string());
        labels
    }

    /// The declared attributes of this face as plain data.
    pub fn snapshot(&self) -> Value {
        let face = self.face;
        let mut map = Mapping::new();
        map.insert(
            "label".into(),
            face.label.clone().map_or(Value::Null, Value::String),
        );
        map.insert(
            "size".into(),
            self.size().map_or(Value::Null, |(w, h)| {
                Value::Sequence(vec![Value::Number(w.into()), Value::Number(h.into())])
            }),
        );
        map.insert(
            "templates".into(),
            Value::Sequence(
                face.templates_labels
                    .iter()
                    .map(|l| Value::String(l.clone()))
                    .collect(),
            ),
        );
        map.insert("is_template".into(), Value::Bool(face.is_template));
        Value::Mapping(map)
    }
}

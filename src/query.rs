//! Selection and navigation over a populated [`Model`].
//!
//! Results are [`QuerySet`]s: ordered, duplicate-free collections of instance
//! ids. Navigation chains start at [`Model::navigate_one`] or
//! [`Model::navigate_many`] and step across links with `nav`:
//!
//! ```
//! # use xtmodel::construct::{AssociationEnd, Cardinality, Model};
//! # use xtmodel::datatype::DataType;
//! # let mut model = Model::default();
//! # model.define_class("X", [("Id", DataType::UniqueId)]).unwrap();
//! # model.define_class("Y", [("Id", DataType::UniqueId), ("X_Id", DataType::UniqueId)]).unwrap();
//! # model.define_association(1, AssociationEnd::new("Y", ["X_Id"], Cardinality::MANY_CONDITIONAL),
//! #     AssociationEnd::new("X", ["Id"], Cardinality::ONE)).unwrap();
//! let x = model.new_instance("X").create().unwrap();
//! let y = model.new_instance("Y").create().unwrap();
//! model.relate(y, x, 1, "").unwrap();
//! let ys = model.navigate_one(x).nav("Y", 1, "").unwrap().many();
//! assert_eq!(ys.first(), Some(y));
//! ```

use std::cmp::Ordering;

use roaring::RoaringTreemap;

use crate::construct::{ClassId, InstanceId, InstanceView, LinkId, Model, RelId};
use crate::datatype::Value;
use crate::error::{ModelError, Result};

// ------------- QuerySet -------------
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySet {
    order: Vec<InstanceId>,
    members: RoaringTreemap,
}

impl QuerySet {
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds the id at the end unless it is already a member.
    pub fn insert(&mut self, id: InstanceId) -> bool {
        let added = self.members.insert(id.0);
        if added {
            self.order.push(id);
        }
        added
    }
    pub fn contains(&self, id: InstanceId) -> bool {
        self.members.contains(id.0)
    }
    pub fn len(&self) -> usize {
        self.order.len()
    }
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
    pub fn first(&self) -> Option<InstanceId> {
        self.order.first().copied()
    }
    pub fn last(&self) -> Option<InstanceId> {
        self.order.last().copied()
    }
    pub fn iter(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.order.iter().copied()
    }
    pub fn as_slice(&self) -> &[InstanceId] {
        &self.order
    }
}

impl FromIterator<InstanceId> for QuerySet {
    fn from_iter<I: IntoIterator<Item = InstanceId>>(iter: I) -> Self {
        let mut set = QuerySet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl IntoIterator for QuerySet {
    type Item = InstanceId;
    type IntoIter = std::vec::IntoIter<InstanceId>;
    fn into_iter(self) -> Self::IntoIter {
        self.order.into_iter()
    }
}

impl<'a> IntoIterator for &'a QuerySet {
    type Item = InstanceId;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, InstanceId>>;
    fn into_iter(self) -> Self::IntoIter {
        self.order.iter().copied()
    }
}

// ------------- Selector -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

type Predicate = Box<dyn Fn(&InstanceView<'_>) -> bool>;

enum Condition {
    Equals(String, Value),
    Predicate(Predicate),
}

/// Filters and orders the instances a selection or navigation produces.
/// An empty selector keeps everything in pool (or navigation) order.
#[derive(Default)]
pub struct Selector {
    conditions: Vec<Condition>,
    ordering: Vec<(String, Direction)>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn where_eq(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Equals(attribute.to_string(), value.into()));
        self
    }
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&InstanceView<'_>) -> bool + 'static,
    {
        self.conditions.push(Condition::Predicate(Box::new(predicate)));
        self
    }
    pub fn order_by(mut self, attribute: &str) -> Self {
        self.ordering
            .push((attribute.to_string(), Direction::Ascending));
        self
    }
    pub fn order_by_desc(mut self, attribute: &str) -> Self {
        self.ordering
            .push((attribute.to_string(), Direction::Descending));
        self
    }
    pub fn matches(&self, view: &InstanceView<'_>) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Equals(name, expected) => {
                let Some(attribute) = view.class().attribute(name) else {
                    return false;
                };
                let actual = view.get(name);
                expected.clone().coerce(attribute.data_type()) == actual
            }
            Condition::Predicate(predicate) => predicate(view),
        })
    }
    fn apply(&self, model: &Model, ids: impl IntoIterator<Item = InstanceId>) -> QuerySet {
        let mut kept: Vec<InstanceView<'_>> = ids
            .into_iter()
            .filter_map(|id| model.view(id))
            .filter(|view| self.matches(view))
            .collect();
        if !self.ordering.is_empty() {
            // stable, so ties keep their incoming order
            kept.sort_by(|a, b| self.compare(a, b));
        }
        kept.into_iter().map(|view| view.id()).collect()
    }
    fn compare(&self, a: &InstanceView<'_>, b: &InstanceView<'_>) -> Ordering {
        for (attribute, direction) in &self.ordering {
            let left = a.get(attribute).unwrap_or_default();
            let right = b.get(attribute).unwrap_or_default();
            let ordering = match direction {
                Direction::Ascending => left.compare(&right),
                Direction::Descending => right.compare(&left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

// ------------- Navigation -------------
/// A navigation chain over a set of instances.
#[derive(Debug, Clone)]
pub struct NavMany<'m> {
    model: &'m Model,
    current: QuerySet,
}

impl<'m> NavMany<'m> {
    /// Steps across the link to `kind` with the given association id and
    /// phrase. Dead or absent instances contribute nothing.
    pub fn nav(self, kind: &str, rel_id: impl Into<RelId>, phrase: &str) -> Result<Self> {
        if self.current.is_empty() {
            return Ok(self);
        }
        let rel_id = rel_id.into();
        let to = self.model.class_id(kind)?;
        let mut resolved: Vec<(ClassId, LinkId)> = Vec::new();
        let mut next = QuerySet::new();
        for id in &self.current {
            let Ok(class) = self.model.class_of(id) else {
                continue;
            };
            let link = match resolved.iter().find(|(from, _)| *from == class.id()) {
                Some((_, link)) => *link,
                None => {
                    let link = self
                        .model
                        .find_link(class.id(), to, rel_id, phrase)
                        .ok_or_else(|| ModelError::UnknownLink {
                            from: class.kind().to_string(),
                            to: kind.to_string(),
                            rel_id,
                            phrase: phrase.to_string(),
                        })?;
                    resolved.push((class.id(), link));
                    link
                }
            };
            for peer in self.model.link(link).navigate(id) {
                next.insert(*peer);
            }
        }
        Ok(Self {
            model: self.model,
            current: next,
        })
    }
    pub fn many(self) -> QuerySet {
        self.current
    }
    pub fn many_where(self, selector: &Selector) -> QuerySet {
        selector.apply(self.model, self.current)
    }
}

/// A navigation chain that ends in at most one instance.
#[derive(Debug, Clone)]
pub struct NavOne<'m> {
    inner: NavMany<'m>,
}

impl<'m> NavOne<'m> {
    pub fn nav(self, kind: &str, rel_id: impl Into<RelId>, phrase: &str) -> Result<Self> {
        Ok(Self {
            inner: self.inner.nav(kind, rel_id, phrase)?,
        })
    }
    pub fn one(self) -> Option<InstanceId> {
        self.inner.current.first()
    }
    pub fn one_where(self, selector: &Selector) -> Option<InstanceId> {
        self.inner.many_where(selector).first()
    }
}

// ------------- Model queries -------------
impl Model {
    pub fn select_many(&self, kind: &str, selector: &Selector) -> Result<QuerySet> {
        let class = self.find_class(kind)?;
        Ok(selector.apply(self, class.instances()))
    }
    pub fn select_one(&self, kind: &str, selector: &Selector) -> Result<Option<InstanceId>> {
        Ok(self.select_many(kind, selector)?.first())
    }
    pub fn navigate_one(&self, from: impl Into<Option<InstanceId>>) -> NavOne<'_> {
        NavOne {
            inner: self.navigate_many(from.into()),
        }
    }
    pub fn navigate_many(&self, from: impl IntoIterator<Item = InstanceId>) -> NavMany<'_> {
        NavMany {
            model: self,
            current: from.into_iter().filter(|id| self.is_live(*id)).collect(),
        }
    }
    /// The first peer found across any link carrying `rel_id`, which for a
    /// supertype is its subtype instance.
    pub fn navigate_subtype(&self, id: InstanceId, rel_id: impl Into<RelId>) -> Option<InstanceId> {
        let rel_id = rel_id.into();
        let class = self.class_of(id).ok()?;
        class
            .links()
            .into_iter()
            .map(|link| self.link(link))
            .filter(|link| link.rel_id() == rel_id)
            .find_map(|link| link.navigate(id).first().copied())
    }
    /// Orders instances that form a list through a reflexive association.
    /// The walk starts at members without a peer across `phrase` and follows
    /// the opposite direction; members never reached are appended in their
    /// incoming order, so cycles still yield every member exactly once.
    pub fn sort_reflexive(
        &self,
        set: &QuerySet,
        rel_id: impl Into<RelId>,
        phrase: &str,
    ) -> Result<QuerySet> {
        let rel_id = rel_id.into();
        let Some(first) = set.first() else {
            return Ok(QuerySet::new());
        };
        let class = self.class_of(first)?;
        let link = self
            .find_link(class.id(), class.id(), rel_id, phrase)
            .ok_or_else(|| ModelError::UnknownLink {
                from: class.kind().to_string(),
                to: class.kind().to_string(),
                rel_id,
                phrase: phrase.to_string(),
            })?;
        let backward = self.link(link);
        let forward = self.link(backward.reverse());

        let mut starts: Vec<InstanceId> = set
            .iter()
            .filter(|id| backward.navigate(*id).is_empty())
            .collect();
        if starts.is_empty() {
            starts.push(first);
        }
        let mut visited = RoaringTreemap::new();
        let mut sorted = QuerySet::new();
        for start in starts {
            let mut current = Some(start);
            while let Some(id) = current {
                if !visited.insert(id.0) {
                    break;
                }
                if set.contains(id) {
                    sorted.insert(id);
                }
                current = forward.navigate(id).first().copied();
            }
        }
        for id in set {
            sorted.insert(id);
        }
        Ok(sorted)
    }
}

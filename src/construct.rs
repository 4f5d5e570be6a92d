// used to keep the one-to-one mapping between kinds and their class ids
use bimap::BiMap;

// class pools are sets of instance ids, kept in id (and thereby creation) order
use roaring::RoaringTreemap;

// other lookups use HashMap
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

// used to print out readable forms of a construct
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

// our own stuff that we need
use crate::datatype::{DataType, Value};
use crate::error::{ModelError, Result};

pub type IdHasher = BuildHasherDefault<SeaHasher>;
pub type NameHasher = BuildHasherDefault<SeaHasher>;

// referential attributes may refer to referential attributes, but never this deep
const MAX_REFERENCE_DEPTH: usize = 64;

// ------------- Ids -------------
/// Stable arena index of an instance. Ids are never reused, so a deleted
/// instance keeps its id and every later instance gets a larger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub usize);

/// Numeric association id, printed as `R<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RelId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}
impl From<u32> for RelId {
    fn from(n: u32) -> Self {
        RelId(n)
    }
}
impl FromStr for RelId {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let digits = s.strip_prefix(['R', 'r']).unwrap_or(s);
        digits
            .parse::<u32>()
            .map(RelId)
            .map_err(|_| format!("invalid association id '{s}'"))
    }
}

// ------------- IdGenerator -------------
/// Produces values for unique-id attributes of new instances.
pub trait IdGenerator: fmt::Debug {
    fn generate(&mut self) -> u128;
    /// Called for every unique-id value loaded from a source, so that
    /// generated ids never collide with loaded ones.
    fn retain(&mut self, _id: u128) {}
}

#[derive(Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&mut self) -> u128 {
        Uuid::new_v4().as_u128()
    }
}

/// Issues 1, 2, 3... above the largest retained id. Retained ids beyond the
/// 64-bit range, such as random UUIDs, are left out of the sequence and the
/// sequence never reaches them.
#[derive(Debug, Default)]
pub struct IntegerGenerator {
    lower_bound: u128,
}

impl IntegerGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for IntegerGenerator {
    fn generate(&mut self) -> u128 {
        self.lower_bound += 1;
        self.lower_bound
    }
    fn retain(&mut self, id: u128) {
        if id > self.lower_bound && id <= u128::from(u64::MAX) {
            self.lower_bound = id;
        }
    }
}

// ------------- Cardinality -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Cardinality {
    pub many: bool,
    pub conditional: bool,
}

impl Cardinality {
    pub const ONE: Cardinality = Cardinality { many: false, conditional: false };
    pub const ONE_CONDITIONAL: Cardinality = Cardinality { many: false, conditional: true };
    pub const MANY: Cardinality = Cardinality { many: true, conditional: false };
    pub const MANY_CONDITIONAL: Cardinality = Cardinality { many: true, conditional: true };
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let many = if self.many { "M" } else { "1" };
        let conditional = if self.conditional { "C" } else { "" };
        write!(f, "{many}{conditional}")
    }
}

impl FromStr for Cardinality {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "1" => Ok(Cardinality::ONE),
            "1C" => Ok(Cardinality::ONE_CONDITIONAL),
            "M" => Ok(Cardinality::MANY),
            "MC" => Ok(Cardinality::MANY_CONDITIONAL),
            _ => Err(format!("malformed cardinality '{s}'")),
        }
    }
}

// ------------- AssociationEnd -------------
/// One side of an association as written in a `CREATE ROP` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationEnd {
    pub kind: String,
    pub keys: Vec<String>,
    pub cardinality: Cardinality,
    pub phrase: String,
}

impl AssociationEnd {
    pub fn new<S: Into<String>>(
        kind: &str,
        keys: impl IntoIterator<Item = S>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            kind: kind.to_string(),
            keys: keys.into_iter().map(Into::into).collect(),
            cardinality,
            phrase: String::new(),
        }
    }
    pub fn phrase(mut self, phrase: &str) -> Self {
        self.phrase = phrase.to_string();
        self
    }
}

// ------------- Attribute -------------
/// A reference a derived slot reads through: the first peer across `link`,
/// at the peer side of key pair number `key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub link: LinkId,
    pub key: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotSource {
    Stored,
    Derived(Vec<Reference>),
}

#[derive(Debug, Clone)]
pub struct Attribute {
    name: String,
    data_type: DataType,
    source: SlotSource,
}

impl Attribute {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn data_type(&self) -> DataType {
        self.data_type
    }
    pub fn source(&self) -> &SlotSource {
        &self.source
    }
    pub fn is_referential(&self) -> bool {
        matches!(self.source, SlotSource::Derived(_))
    }
}

// ------------- UniqueIndex -------------
#[derive(Debug, Clone)]
pub struct UniqueIndex {
    name: String,
    attributes: Vec<String>,
}

impl UniqueIndex {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }
}

// ------------- ClassDescriptor -------------
type LinkKey = (String, RelId, String);

#[derive(Debug)]
pub struct ClassDescriptor {
    id: ClassId,
    kind: String,
    attributes: Vec<Attribute>,
    slots: HashMap<String, usize, NameHasher>,
    identifying: BTreeSet<String>,
    indices: Vec<UniqueIndex>,
    links: HashMap<LinkKey, LinkId, NameHasher>,
    pool: RoaringTreemap,
}

impl ClassDescriptor {
    fn new(id: ClassId, kind: &str, attributes: Vec<Attribute>) -> Self {
        let mut class = Self {
            id,
            kind: kind.to_string(),
            attributes,
            slots: HashMap::default(),
            identifying: BTreeSet::new(),
            indices: Vec::new(),
            links: HashMap::default(),
            pool: RoaringTreemap::new(),
        };
        class.relayout();
        class
    }
    // name resolution happens here, once per layout change, never per access
    fn relayout(&mut self) {
        self.slots = self
            .attributes
            .iter()
            .enumerate()
            .map(|(slot, attribute)| (attribute.name.to_uppercase(), slot))
            .collect();
    }
    pub fn id(&self) -> ClassId {
        self.id
    }
    pub fn kind(&self) -> &str {
        &self.kind
    }
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.slots.get(&name.to_uppercase()).copied()
    }
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.slot(name).map(|slot| &self.attributes[slot])
    }
    pub fn is_identifying(&self, name: &str) -> bool {
        self.identifying.contains(&name.to_uppercase())
    }
    pub fn is_referential(&self, name: &str) -> bool {
        self.attribute(name).is_some_and(Attribute::is_referential)
    }
    /// Identifying attributes in declaration order.
    pub fn identifying_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes
            .iter()
            .filter(|attribute| self.identifying.contains(&attribute.name.to_uppercase()))
    }
    pub fn referential_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|attribute| attribute.is_referential())
    }
    pub fn indices(&self) -> &[UniqueIndex] {
        &self.indices
    }
    pub fn index(&self, name: &str) -> Option<&UniqueIndex> {
        self.indices
            .iter()
            .find(|index| index.name.eq_ignore_ascii_case(name))
    }
    /// Outgoing links, in link creation order.
    pub fn links(&self) -> Vec<LinkId> {
        let mut links: Vec<LinkId> = self.links.values().copied().collect();
        links.sort_unstable();
        links
    }
    pub fn pool(&self) -> &RoaringTreemap {
        &self.pool
    }
    pub fn instances(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.pool.iter().map(InstanceId)
    }
    pub fn len(&self) -> usize {
        self.pool.len() as usize
    }
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

// ------------- Link -------------
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub local: String,
    pub peer: String,
    pub local_slot: usize,
    pub peer_slot: usize,
}

/// One direction of an association, from instances of `from` to their peers
/// of kind `to`.
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    rel_id: RelId,
    from: ClassId,
    to: ClassId,
    phrase: String,
    cardinality: Cardinality,
    keys: Vec<KeyPair>,
    reverse: LinkId,
    association: usize,
    peers: HashMap<InstanceId, Vec<InstanceId>, IdHasher>,
}

impl Link {
    pub fn id(&self) -> LinkId {
        self.id
    }
    pub fn rel_id(&self) -> RelId {
        self.rel_id
    }
    pub fn from(&self) -> ClassId {
        self.from
    }
    pub fn to(&self) -> ClassId {
        self.to
    }
    pub fn phrase(&self) -> &str {
        &self.phrase
    }
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
    pub fn many(&self) -> bool {
        self.cardinality.many
    }
    pub fn conditional(&self) -> bool {
        self.cardinality.conditional
    }
    pub fn keys(&self) -> &[KeyPair] {
        &self.keys
    }
    pub fn reverse(&self) -> LinkId {
        self.reverse
    }
    pub fn association(&self) -> usize {
        self.association
    }
    /// Peers of `id` across this link, in connection order.
    pub fn navigate(&self, id: InstanceId) -> &[InstanceId] {
        self.peers.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn contains(&self, from: InstanceId, to: InstanceId) -> bool {
        self.navigate(from).contains(&to)
    }
    fn can_connect(&self, from: InstanceId, to: InstanceId) -> bool {
        let peers = self.navigate(from);
        peers.is_empty() || self.cardinality.many || peers.contains(&to)
    }
    fn connect(&mut self, from: InstanceId, to: InstanceId) {
        let peers = self.peers.entry(from).or_default();
        if !peers.contains(&to) {
            peers.push(to);
        }
    }
    // the caller guarantees the pair is not yet connected
    fn push(&mut self, from: InstanceId, to: InstanceId) {
        self.peers.entry(from).or_default().push(to);
    }
    fn disconnect(&mut self, from: InstanceId, to: InstanceId) -> bool {
        match self.peers.entry(from) {
            Entry::Occupied(mut e) => {
                let peers = e.get_mut();
                let before = peers.len();
                peers.retain(|peer| *peer != to);
                let removed = peers.len() != before;
                if peers.is_empty() {
                    e.remove();
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }
    fn forget(&mut self, id: InstanceId) -> Vec<InstanceId> {
        self.peers.remove(&id).unwrap_or_default()
    }
}

// ------------- Association -------------
/// Two links under one association id. The source side holds the
/// referential keys, the target side the identifying keys they copy.
#[derive(Debug)]
pub struct Association {
    rel_id: RelId,
    source: ClassId,
    target: ClassId,
    source_keys: Vec<String>,
    target_keys: Vec<String>,
    // target -> source, carries the source cardinality and the target phrase
    source_link: LinkId,
    // source -> target, carries the target cardinality and the source phrase
    target_link: LinkId,
}

impl Association {
    pub fn rel_id(&self) -> RelId {
        self.rel_id
    }
    pub fn source(&self) -> ClassId {
        self.source
    }
    pub fn target(&self) -> ClassId {
        self.target
    }
    pub fn source_keys(&self) -> &[String] {
        &self.source_keys
    }
    pub fn target_keys(&self) -> &[String] {
        &self.target_keys
    }
    pub fn source_link(&self) -> LinkId {
        self.source_link
    }
    pub fn target_link(&self) -> LinkId {
        self.target_link
    }
    pub fn is_reflexive(&self) -> bool {
        self.source == self.target
    }
}

// ------------- Instance -------------
#[derive(Debug, Clone)]
pub struct Instance {
    class: ClassId,
    values: Vec<Value>,
}

impl Instance {
    pub fn class(&self) -> ClassId {
        self.class
    }
    /// Stored values by slot; derived slots hold their last copied value.
    pub fn raw_values(&self) -> &[Value] {
        &self.values
    }
}

/// Read access to one live instance.
#[derive(Clone, Copy)]
pub struct InstanceView<'m> {
    model: &'m Model,
    id: InstanceId,
    class: &'m ClassDescriptor,
}

impl<'m> InstanceView<'m> {
    pub fn id(&self) -> InstanceId {
        self.id
    }
    pub fn kind(&self) -> &'m str {
        self.class.kind()
    }
    pub fn class(&self) -> &'m ClassDescriptor {
        self.class
    }
    pub fn get(&self, name: &str) -> Option<Value> {
        self.class.slot(name).map(|slot| self.model.read(self.id, slot))
    }
    pub fn values(&self) -> Vec<Value> {
        (0..self.class.attributes.len())
            .map(|slot| self.model.read(self.id, slot))
            .collect()
    }
}

impl fmt::Debug for InstanceView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.model.describe(self.id))
    }
}

impl fmt::Display for InstanceView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.model.describe(self.id))
    }
}

// ------------- InstanceBuilder -------------
/// Collects positional and named values for a new instance. Positional
/// values are assigned before named ones.
pub struct InstanceBuilder<'m> {
    model: &'m mut Model,
    kind: String,
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl<'m> InstanceBuilder<'m> {
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }
    pub fn args<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.positional.extend(values.into_iter().map(Into::into));
        self
    }
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.named.push((name.to_string(), value.into()));
        self
    }
    pub fn create(self) -> Result<InstanceId> {
        self.model
            .create_instance(&self.kind, self.positional, self.named)
    }
}

// ------------- Model -------------
#[derive(Debug)]
pub struct Model {
    classes: Vec<ClassDescriptor>,
    kinds: BiMap<String, ClassId>,
    links: Vec<Link>,
    associations: Vec<Association>,
    instances: Vec<Option<Instance>>,
    id_generator: Box<dyn IdGenerator>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Self::with_id_generator(Box::new(UuidGenerator))
    }
    pub fn with_id_generator(id_generator: Box<dyn IdGenerator>) -> Self {
        Self {
            classes: Vec::new(),
            kinds: BiMap::new(),
            links: Vec::new(),
            associations: Vec::new(),
            instances: Vec::new(),
            id_generator,
        }
    }
    pub fn next_id(&mut self) -> u128 {
        self.id_generator.generate()
    }

    // ------------- schema -------------
    pub fn define_class<S: Into<String>>(
        &mut self,
        kind: &str,
        attributes: impl IntoIterator<Item = (S, DataType)>,
    ) -> Result<ClassId> {
        let keepsake = kind.to_uppercase();
        if self.kinds.contains_left(&keepsake) {
            return Err(ModelError::DuplicateClass(kind.to_string()));
        }
        let mut kept: Vec<Attribute> = Vec::new();
        for (name, data_type) in attributes {
            let name = name.into();
            if kept.iter().any(|a| a.name.eq_ignore_ascii_case(&name)) {
                return Err(ModelError::DuplicateAttribute {
                    kind: kind.to_string(),
                    attribute: name,
                });
            }
            kept.push(Attribute {
                name,
                data_type,
                source: SlotSource::Stored,
            });
        }
        let id = ClassId(self.classes.len());
        debug!("defining class {} with {} attributes", kind, kept.len());
        self.classes.push(ClassDescriptor::new(id, kind, kept));
        self.kinds.insert(keepsake, id);
        Ok(id)
    }
    pub fn has_class(&self, kind: &str) -> bool {
        self.kinds.contains_left(&kind.to_uppercase())
    }
    pub fn class_id(&self, kind: &str) -> Result<ClassId> {
        self.kinds
            .get_by_left(&kind.to_uppercase())
            .copied()
            .ok_or_else(|| ModelError::UnknownClass(kind.to_string()))
    }
    pub fn find_class(&self, kind: &str) -> Result<&ClassDescriptor> {
        self.class_id(kind).map(|id| &self.classes[id.0])
    }
    pub fn class(&self, id: ClassId) -> &ClassDescriptor {
        &self.classes[id.0]
    }
    pub fn classes(&self) -> &[ClassDescriptor] {
        &self.classes
    }
    pub fn associations(&self) -> &[Association] {
        &self.associations
    }
    pub fn association(&self, rel_id: RelId) -> Option<&Association> {
        self.associations.iter().find(|a| a.rel_id == rel_id)
    }
    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id.0]
    }

    pub fn append_attribute(&mut self, kind: &str, name: &str, data_type: DataType) -> Result<()> {
        let position = self.find_class(kind)?.attributes.len();
        self.insert_attribute(kind, position, name, data_type)
    }
    /// Inserts an attribute at `position` (clamped to the attribute count).
    /// Live instances get the type's null value in the new slot.
    pub fn insert_attribute(
        &mut self,
        kind: &str,
        position: usize,
        name: &str,
        data_type: DataType,
    ) -> Result<()> {
        let class_id = self.class_id(kind)?;
        let class = &mut self.classes[class_id.0];
        if class.slot(name).is_some() {
            return Err(ModelError::DuplicateAttribute {
                kind: class.kind.clone(),
                attribute: name.to_string(),
            });
        }
        let position = position.min(class.attributes.len());
        class.attributes.insert(
            position,
            Attribute {
                name: name.to_string(),
                data_type,
                source: SlotSource::Stored,
            },
        );
        for id in class.pool.iter() {
            if let Some(instance) = self.instances[id as usize].as_mut() {
                instance.values.insert(position, data_type.null_value());
            }
        }
        self.relayout();
        Ok(())
    }
    pub fn delete_attribute(&mut self, kind: &str, name: &str) -> Result<()> {
        let class_id = self.class_id(kind)?;
        let class = &mut self.classes[class_id.0];
        let slot = class.slot(name).ok_or_else(|| ModelError::UnknownAttribute {
            kind: class.kind.clone(),
            attribute: name.to_string(),
        })?;
        let in_index = class
            .indices
            .iter()
            .any(|index| index.attributes.iter().any(|a| a.eq_ignore_ascii_case(name)));
        if in_index || class.is_identifying(name) || class.attributes[slot].is_referential() {
            return Err(ModelError::AttributeInUse {
                kind: class.kind.clone(),
                attribute: name.to_string(),
            });
        }
        class.attributes.remove(slot);
        for id in class.pool.iter() {
            if let Some(instance) = self.instances[id as usize].as_mut() {
                instance.values.remove(slot);
            }
        }
        self.relayout();
        Ok(())
    }
    // recomputes every cached slot after an attribute was added or removed
    fn relayout(&mut self) {
        for class in self.classes.iter_mut() {
            class.relayout();
        }
        for link in self.links.iter_mut() {
            let from = &self.classes[link.from.0];
            let to = &self.classes[link.to.0];
            for key in link.keys.iter_mut() {
                if let Some(slot) = from.slot(&key.local) {
                    key.local_slot = slot;
                }
                if let Some(slot) = to.slot(&key.peer) {
                    key.peer_slot = slot;
                }
            }
        }
    }

    pub fn define_unique_identifier<S: AsRef<str>>(
        &mut self,
        kind: &str,
        name: &str,
        attributes: impl IntoIterator<Item = S>,
    ) -> Result<()> {
        let class_id = self.class_id(kind)?;
        let class = &mut self.classes[class_id.0];
        if class.index(name).is_some() {
            return Err(ModelError::DuplicateIndex {
                kind: class.kind.clone(),
                index: name.to_string(),
            });
        }
        let mut names = Vec::new();
        for attribute in attributes {
            let attribute = attribute.as_ref();
            let slot = class.slot(attribute).ok_or_else(|| ModelError::UnknownAttribute {
                kind: class.kind.clone(),
                attribute: attribute.to_string(),
            })?;
            names.push(class.attributes[slot].name.clone());
        }
        for attribute in &names {
            class.identifying.insert(attribute.to_uppercase());
        }
        class.indices.push(UniqueIndex {
            name: name.to_string(),
            attributes: names,
        });
        Ok(())
    }

    /// Defines an association between the kinds of both ends. The source
    /// end's keys refer to the target end's keys, pairwise.
    pub fn define_association(
        &mut self,
        rel_id: impl Into<RelId>,
        source: AssociationEnd,
        target: AssociationEnd,
    ) -> Result<usize> {
        let rel_id = rel_id.into();
        let source_class = self.class_id(&source.kind)?;
        let target_class = self.class_id(&target.kind)?;
        if source.keys.len() != target.keys.len() {
            return Err(ModelError::InvalidAssociation {
                rel_id,
                message: format!(
                    "{} source keys but {} target keys",
                    source.keys.len(),
                    target.keys.len()
                ),
            });
        }
        let mut forward_keys = Vec::new();
        let mut backward_keys = Vec::new();
        for (local, peer) in source.keys.iter().zip(target.keys.iter()) {
            let local_slot = self.attribute_slot(source_class, local)?;
            let peer_slot = self.attribute_slot(target_class, peer)?;
            forward_keys.push(KeyPair {
                local: local.clone(),
                peer: peer.clone(),
                local_slot,
                peer_slot,
            });
            backward_keys.push(KeyPair {
                local: peer.clone(),
                peer: local.clone(),
                local_slot: peer_slot,
                peer_slot: local_slot,
            });
        }

        let target_key: LinkKey = (
            self.classes[target_class.0].kind.to_uppercase(),
            rel_id,
            source.phrase.clone(),
        );
        let source_key: LinkKey = (
            self.classes[source_class.0].kind.to_uppercase(),
            rel_id,
            target.phrase.clone(),
        );
        let clash = self.classes[source_class.0].links.contains_key(&target_key)
            || self.classes[target_class.0].links.contains_key(&source_key)
            || (source_class == target_class && source.phrase == target.phrase);
        if clash {
            return Err(ModelError::InvalidAssociation {
                rel_id,
                message: format!(
                    "a link between {} and {} with that phrase already exists",
                    source.kind, target.kind
                ),
            });
        }

        let association = self.associations.len();
        let target_link = LinkId(self.links.len());
        let source_link = LinkId(self.links.len() + 1);
        self.links.push(Link {
            id: target_link,
            rel_id,
            from: source_class,
            to: target_class,
            phrase: source.phrase.clone(),
            cardinality: target.cardinality,
            keys: forward_keys,
            reverse: source_link,
            association,
            peers: HashMap::default(),
        });
        self.links.push(Link {
            id: source_link,
            rel_id,
            from: target_class,
            to: source_class,
            phrase: target.phrase.clone(),
            cardinality: source.cardinality,
            keys: backward_keys,
            reverse: target_link,
            association,
            peers: HashMap::default(),
        });
        self.classes[source_class.0].links.insert(target_key, target_link);
        self.classes[target_class.0].links.insert(source_key, source_link);
        self.associations.push(Association {
            rel_id,
            source: source_class,
            target: target_class,
            source_keys: source.keys,
            target_keys: target.keys,
            source_link,
            target_link,
        });
        self.formalize(association);
        debug!(
            "defined association {} from {} to {}",
            rel_id, source.kind, target.kind
        );
        Ok(association)
    }
    // source keys become derived slots, target keys become identifying
    fn formalize(&mut self, association: usize) {
        let association = &self.associations[association];
        let target_link = association.target_link;
        let link = &self.links[target_link.0];
        let source = &mut self.classes[association.source.0];
        for (key, pair) in link.keys.iter().enumerate() {
            let attribute = &mut source.attributes[pair.local_slot];
            let reference = Reference {
                link: target_link,
                key,
            };
            match &mut attribute.source {
                SlotSource::Derived(references) => references.push(reference),
                SlotSource::Stored => attribute.source = SlotSource::Derived(vec![reference]),
            }
        }
        let target = &mut self.classes[association.target.0];
        for key in &association.target_keys {
            target.identifying.insert(key.to_uppercase());
        }
    }
    fn attribute_slot(&self, class: ClassId, name: &str) -> Result<usize> {
        let class = &self.classes[class.0];
        class.slot(name).ok_or_else(|| ModelError::UnknownAttribute {
            kind: class.kind.clone(),
            attribute: name.to_string(),
        })
    }

    // ------------- instances -------------
    pub fn new_instance(&mut self, kind: &str) -> InstanceBuilder<'_> {
        InstanceBuilder {
            model: self,
            kind: kind.to_string(),
            positional: Vec::new(),
            named: Vec::new(),
        }
    }
    /// Allocates an instance with default values, then assigns the positional
    /// and named values in that order. Values for referential attributes are
    /// used to relate the instance to matching peers instead.
    pub fn create_instance(
        &mut self,
        kind: &str,
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
    ) -> Result<InstanceId> {
        let class_id = self.class_id(kind)?;
        let mut values = Vec::with_capacity(self.classes[class_id.0].attributes.len());
        for attribute in &self.classes[class_id.0].attributes {
            let value = match (attribute.data_type, attribute.is_referential()) {
                (DataType::UniqueId, false) => Value::UniqueId(self.id_generator.generate()),
                (data_type, _) => data_type.null_value(),
            };
            values.push(value);
        }
        let class = &self.classes[class_id.0];
        if positional.len() > class.attributes.len() {
            warn!(
                "{} values given for {} which has {} attributes",
                positional.len(),
                class.kind,
                class.attributes.len()
            );
        }
        let mut deferred: Vec<(usize, Value)> = Vec::new();
        let assignments = positional
            .into_iter()
            .zip(0..class.attributes.len())
            .map(|(value, slot)| Ok((slot, value)))
            .chain(named.into_iter().map(|(name, value)| {
                class
                    .slot(&name)
                    .map(|slot| (slot, value))
                    .ok_or_else(|| ModelError::UnknownAttribute {
                        kind: class.kind.clone(),
                        attribute: name,
                    })
            }));
        for assignment in assignments {
            let (slot, value) = assignment?;
            let attribute = &class.attributes[slot];
            let value = coerce(class, attribute, value)?;
            if attribute.is_referential() {
                deferred.retain(|(s, _)| *s != slot);
                deferred.push((slot, value));
            } else {
                values[slot] = value;
            }
        }

        let id = InstanceId(self.instances.len() as u64);
        self.instances.push(Some(Instance {
            class: class_id,
            values,
        }));
        self.classes[class_id.0].pool.insert(id.0);
        if !deferred.is_empty() {
            self.auto_relate(id, &deferred);
        }
        Ok(id)
    }
    // relates a new instance to every peer whose identifying values match
    fn auto_relate(&mut self, id: InstanceId, deferred: &[(usize, Value)]) {
        let Some(class_id) = self.instance(id).map(Instance::class) else {
            return;
        };
        let mut resolved: Vec<usize> = Vec::new();
        for link_id in self.classes[class_id.0].links() {
            let link = &self.links[link_id.0];
            if self.associations[link.association].target_link != link_id {
                continue;
            }
            let wanted: Vec<(usize, &Value)> = link
                .keys
                .iter()
                .filter_map(|pair| {
                    deferred
                        .iter()
                        .find(|(slot, _)| *slot == pair.local_slot)
                        .map(|(_, value)| (pair.peer_slot, value))
                })
                .collect();
            if wanted.is_empty() || wanted.iter().all(|(_, value)| value.is_null_reference()) {
                continue;
            }
            let peer = self.classes[link.to.0]
                .instances()
                .find(|peer| wanted.iter().all(|(slot, value)| self.read(*peer, *slot) == **value));
            let Some(peer) = peer else {
                continue;
            };
            let association = link.association;
            let local_slots: Vec<usize> = link.keys.iter().map(|pair| pair.local_slot).collect();
            match self.attach(id, peer, association, true) {
                Ok(()) => resolved.extend(local_slots),
                Err(e) => warn!("{}", e),
            }
        }
        for (slot, value) in deferred {
            if !resolved.contains(slot) && !value.is_null_reference() {
                let class = &self.classes[class_id.0];
                warn!(
                    "no instance to relate {} to for {}.{} = {}",
                    id,
                    class.kind,
                    class.attributes[*slot].name,
                    value
                );
            }
        }
    }
    /// Adds an instance with the given values as they are, without defaults
    /// or relating. Unique-id values are retained by the id generator.
    pub(crate) fn load_instance(&mut self, class_id: ClassId, values: Vec<Value>) -> InstanceId {
        for value in &values {
            if let Value::UniqueId(uid) = value {
                self.id_generator.retain(*uid);
            }
        }
        let id = InstanceId(self.instances.len() as u64);
        self.instances.push(Some(Instance {
            class: class_id,
            values,
        }));
        self.classes[class_id.0].pool.insert(id.0);
        id
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id.0 as usize).and_then(Option::as_ref)
    }
    pub fn is_live(&self, id: InstanceId) -> bool {
        self.instance(id).is_some()
    }
    pub fn class_of(&self, id: InstanceId) -> Result<&ClassDescriptor> {
        self.instance(id)
            .map(|instance| &self.classes[instance.class.0])
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }
    pub fn kind_of(&self, id: InstanceId) -> Option<&str> {
        self.class_of(id).ok().map(ClassDescriptor::kind)
    }
    pub fn view(&self, id: InstanceId) -> Option<InstanceView<'_>> {
        self.instance(id).map(|instance| InstanceView {
            model: self,
            id,
            class: &self.classes[instance.class.0],
        })
    }
    /// Number of live instances across all classes.
    pub fn len(&self) -> usize {
        self.classes.iter().map(ClassDescriptor::len).sum()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the value in `slot`. Derived slots read through their references
    /// and fall back to the stored value when no reference resolves.
    pub fn read(&self, id: InstanceId, slot: usize) -> Value {
        self.read_at(id, slot, 0)
    }
    fn read_at(&self, id: InstanceId, slot: usize, depth: usize) -> Value {
        let Some(instance) = self.instance(id) else {
            return Value::Null;
        };
        let attribute = &self.classes[instance.class.0].attributes[slot];
        if let SlotSource::Derived(references) = &attribute.source {
            if depth < MAX_REFERENCE_DEPTH {
                for reference in references {
                    let link = &self.links[reference.link.0];
                    if let Some(peer) = link.navigate(id).first() {
                        return self.read_at(*peer, link.keys[reference.key].peer_slot, depth + 1);
                    }
                }
            }
        }
        instance.values[slot].clone()
    }
    pub fn get(&self, id: InstanceId, name: &str) -> Result<Value> {
        let class = self.class_of(id)?;
        let slot = class.slot(name).ok_or_else(|| ModelError::UnknownAttribute {
            kind: class.kind.clone(),
            attribute: name.to_string(),
        })?;
        Ok(self.read(id, slot))
    }
    pub fn set(&mut self, id: InstanceId, name: &str, value: impl Into<Value>) -> Result<()> {
        let class = self.class_of(id)?;
        let slot = class.slot(name).ok_or_else(|| ModelError::UnknownAttribute {
            kind: class.kind.clone(),
            attribute: name.to_string(),
        })?;
        let attribute = &class.attributes[slot];
        if attribute.is_referential() {
            return Err(ModelError::ReferentialAssignment {
                kind: class.kind.clone(),
                attribute: attribute.name.clone(),
            });
        }
        let value = coerce(class, attribute, value.into())?;
        if let Some(instance) = self.instances[id.0 as usize].as_mut() {
            instance.values[slot] = value;
        }
        Ok(())
    }
    /// `KIND(attribute=value, ...)`, naming the attributes of the first unique
    /// index, or all attributes when the class has none.
    pub fn describe(&self, id: InstanceId) -> String {
        let Ok(class) = self.class_of(id) else {
            return id.to_string();
        };
        let slots: Vec<usize> = match class.indices.first() {
            Some(index) => index.attributes.iter().filter_map(|a| class.slot(a)).collect(),
            None => (0..class.attributes.len()).collect(),
        };
        let pairs: Vec<String> = slots
            .into_iter()
            .map(|slot| format!("{}={}", class.attributes[slot].name, self.read(id, slot)))
            .collect();
        format!("{}({})", class.kind, pairs.join(", "))
    }

    // ------------- linking -------------
    /// Finds the link from instances of `from` to instances of `to`. For
    /// non-reflexive associations an empty phrase falls back to the only
    /// link between the two kinds.
    pub fn find_link(&self, from: ClassId, to: ClassId, rel_id: RelId, phrase: &str) -> Option<LinkId> {
        let class = &self.classes[from.0];
        let peer_kind = self.classes[to.0].kind.to_uppercase();
        let key: LinkKey = (peer_kind, rel_id, phrase.to_string());
        if let Some(link) = class.links.get(&key) {
            return Some(*link);
        }
        if from == to || !phrase.is_empty() {
            return None;
        }
        let mut candidates = class
            .links
            .iter()
            .filter(|((kind, rel, _), _)| *kind == key.0 && *rel == rel_id)
            .map(|(_, link)| *link);
        match (candidates.next(), candidates.next()) {
            (Some(link), None) => Some(link),
            _ => None,
        }
    }
    pub fn link_between(&self, from_kind: &str, to_kind: &str, rel_id: RelId, phrase: &str) -> Result<LinkId> {
        let from = self.class_id(from_kind)?;
        let to = self.class_id(to_kind)?;
        self.find_link(from, to, rel_id, phrase)
            .ok_or_else(|| ModelError::UnknownLink {
                from: from_kind.to_string(),
                to: to_kind.to_string(),
                rel_id,
                phrase: phrase.to_string(),
            })
    }
    // resolves which of the two is the source (referring) side
    fn orient(
        &self,
        a: InstanceId,
        b: InstanceId,
        rel_id: RelId,
        phrase: &str,
    ) -> Result<(InstanceId, InstanceId, usize)> {
        let from = self.class_of(a)?;
        let to = self.class_of(b)?;
        let link = self
            .find_link(from.id, to.id, rel_id, phrase)
            .ok_or_else(|| ModelError::UnknownLink {
                from: from.kind.clone(),
                to: to.kind.clone(),
                rel_id,
                phrase: phrase.to_string(),
            })?;
        let association = self.links[link.0].association;
        if self.associations[association].target_link == link {
            Ok((a, b, association))
        } else {
            Ok((b, a, association))
        }
    }
    fn attach(&mut self, source: InstanceId, target: InstanceId, association: usize, check: bool) -> Result<()> {
        let association = &self.associations[association];
        let (forward, backward) = (association.target_link, association.source_link);
        if check
            && !(self.links[forward.0].can_connect(source, target)
                && self.links[backward.0].can_connect(target, source))
        {
            let link = &self.links[forward.0];
            return Err(ModelError::RelateConflict {
                from: self.describe(source),
                to: self.describe(target),
                rel_id: link.rel_id,
                phrase: link.phrase.clone(),
            });
        }
        self.links[forward.0].connect(source, target);
        self.links[backward.0].connect(target, source);
        let copies: Vec<(usize, Value)> = self.links[forward.0]
            .keys
            .iter()
            .map(|pair| (pair.local_slot, self.read(target, pair.peer_slot)))
            .collect();
        if let Some(instance) = self.instances[source.0 as usize].as_mut() {
            for (slot, value) in copies {
                instance.values[slot] = value;
            }
        }
        Ok(())
    }
    /// Relates two instances across an association. Either order of the two
    /// instances works; the phrase tells the directions of a reflexive
    /// association apart.
    pub fn relate(&mut self, a: InstanceId, b: InstanceId, rel_id: impl Into<RelId>, phrase: &str) -> Result<()> {
        let (source, target, association) = self.orient(a, b, rel_id.into(), phrase)?;
        self.attach(source, target, association, true)
    }
    pub fn unrelate(&mut self, a: InstanceId, b: InstanceId, rel_id: impl Into<RelId>, phrase: &str) -> Result<()> {
        let rel_id = rel_id.into();
        let (source, target, association) = self.orient(a, b, rel_id, phrase)?;
        let association = &self.associations[association];
        let (forward, backward) = (association.target_link, association.source_link);
        if !self.links[forward.0].contains(source, target) {
            return Err(ModelError::UnrelateConflict {
                from: self.describe(source),
                to: self.describe(target),
                rel_id,
                phrase: phrase.to_string(),
            });
        }
        self.links[forward.0].disconnect(source, target);
        self.links[backward.0].disconnect(target, source);
        self.reset_keys(source, forward);
        Ok(())
    }
    // referential values of an instance left without a peer go back to null
    fn reset_keys(&mut self, source: InstanceId, forward: LinkId) {
        let link = &self.links[forward.0];
        if !link.navigate(source).is_empty() {
            return;
        }
        let class = match self.instance(source) {
            Some(instance) => instance.class,
            None => return,
        };
        let resets: Vec<(usize, Value)> = link
            .keys
            .iter()
            .map(|pair| {
                let data_type = self.classes[class.0].attributes[pair.local_slot].data_type;
                (pair.local_slot, data_type.null_value())
            })
            .collect();
        if let Some(instance) = self.instances[source.0 as usize].as_mut() {
            for (slot, value) in resets {
                instance.values[slot] = value;
            }
        }
    }
    /// Removes a live instance from its pool and from every link.
    pub fn delete(&mut self, id: InstanceId) -> Result<()> {
        let class_id = self.class_of(id)?.id;
        for link_id in self.classes[class_id.0].links() {
            let peers = self.links[link_id.0].forget(id);
            let reverse = self.links[link_id.0].reverse;
            let association = self.links[link_id.0].association;
            let peers_refer = self.associations[association].target_link == reverse;
            for peer in peers {
                self.links[reverse.0].disconnect(peer, id);
                if peers_refer && peer != id {
                    self.reset_keys(peer, reverse);
                }
            }
        }
        self.classes[class_id.0].pool.remove(id.0);
        self.instances[id.0 as usize] = None;
        debug!("deleted {}", id);
        Ok(())
    }
    /// Re-creates the instance's values as a new instance of the same kind.
    pub fn clone_instance(&mut self, id: InstanceId) -> Result<InstanceId> {
        let (kind, values) = self.snapshot(id)?;
        self.create_instance(&kind, values, Vec::new())
    }
    /// Re-creates the instance in another model that declares its kind.
    pub fn clone_into(&self, id: InstanceId, other: &mut Model) -> Result<InstanceId> {
        let (kind, values) = self.snapshot(id)?;
        other.create_instance(&kind, values, Vec::new())
    }
    fn snapshot(&self, id: InstanceId) -> Result<(String, Vec<Value>)> {
        let view = self
            .view(id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))?;
        Ok((view.kind().to_string(), view.values()))
    }

    /// Connects every loaded source instance to the target whose identifying
    /// values equal its referential values, for every association. Links are
    /// connected without cardinality checks, leaving breaches to the checker.
    pub fn batch_relate(&mut self) {
        for association in 0..self.associations.len() {
            let (forward, backward, target) = {
                let a = &self.associations[association];
                (a.target_link, a.source_link, a.target)
            };
            let key_slots: Vec<(usize, usize)> = self.links[forward.0]
                .keys
                .iter()
                .map(|pair| (pair.local_slot, pair.peer_slot))
                .collect();
            let mut targets: HashMap<Vec<Value>, InstanceId, IdHasher> = HashMap::default();
            for peer in self.classes[target.0].instances() {
                if let Some(instance) = self.instance(peer) {
                    let key: Vec<Value> = key_slots
                        .iter()
                        .map(|(_, slot)| instance.values[*slot].clone())
                        .collect();
                    targets.entry(key).or_insert(peer);
                }
            }
            let source = self.associations[association].source;
            let mut pairs = Vec::new();
            for id in self.classes[source.0].instances() {
                let Some(instance) = self.instance(id) else {
                    continue;
                };
                let key: Vec<Value> = key_slots
                    .iter()
                    .map(|(slot, _)| instance.values[*slot].clone())
                    .collect();
                if key.iter().all(Value::is_null_reference) {
                    continue;
                }
                if let Some(peer) = targets.get(&key) {
                    if !self.links[forward.0].contains(id, *peer) {
                        pairs.push((id, *peer));
                    }
                }
            }
            for (id, peer) in pairs {
                self.links[forward.0].push(id, peer);
                self.links[backward.0].push(peer, id);
            }
        }
    }
}

fn coerce(class: &ClassDescriptor, attribute: &Attribute, value: Value) -> Result<Value> {
    let found = value.type_name().to_string();
    value
        .coerce(attribute.data_type)
        .ok_or_else(|| ModelError::TypeMismatch {
            kind: class.kind.clone(),
            attribute: attribute.name.clone(),
            expected: attribute.data_type,
            found,
        })
}

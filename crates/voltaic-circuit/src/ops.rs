// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Edit operations: validated, revision-numbered mutations.
//!
//! Every edit is validated against the current circuit and applied
//! all-or-nothing: the mutation runs against a working copy which replaces
//! the circuit only on success, so a failed edit leaves the pre-state
//! bit-identical. A successful edit appends to the revision log and returns
//! the new revision number.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classes::{pin_templates, property_specs};
use crate::model::{
    Block, BlockId, Circuit, Component, ComponentClass, ComponentId, Net, NetId, Pin,
    PinDirection, PinId, PropertyValue, RevisionEntry,
};

/// Pin declaration carried by `AddComponent` for custom classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPin {
    /// Pin name within the component.
    pub name: String,
    /// Direction relative to the component.
    pub direction: PinDirection,
    /// Width in bits.
    pub width: u8,
}

/// Kind selector for [`EditOperation::RenameEntity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Rename a component (pin ids follow).
    Component,
    /// Rename a net.
    Net,
    /// Rename a block.
    Block,
}

/// One primitive, validated mutation on the circuit model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOperation {
    /// Instantiate a component. Built-in classes take their pins from the
    /// class registry; custom classes declare pins explicitly.
    AddComponent {
        /// New unique component id.
        id: ComponentId,
        /// Component class.
        class: ComponentClass,
        /// Initial properties (validated against the class schema).
        #[serde(default)]
        properties: std::collections::BTreeMap<String, PropertyValue>,
        /// Explicit pins, custom classes only.
        #[serde(default)]
        custom_pins: Vec<CustomPin>,
    },

    /// Remove a component. Without `cascade`, the component must be fully
    /// detached; with it, attached pins are pulled off their nets and the
    /// detachments recorded here in the op log.
    RemoveComponent {
        /// Component to remove.
        id: ComponentId,
        /// Whether to cascade net/block detachment.
        cascade: bool,
        /// Pins the cascade detached (filled in by apply).
        #[serde(default)]
        detached: Vec<PinId>,
    },

    /// Set a class-declared property.
    SetProperty {
        /// Target component.
        component: ComponentId,
        /// Property name (must be declared for the class).
        name: String,
        /// New value (must fit the declared type/range).
        value: PropertyValue,
    },

    /// Set placement coordinates.
    MoveComponent {
        /// Target component.
        component: ComponentId,
        /// X coordinate.
        x: i64,
        /// Y coordinate.
        y: i64,
    },

    /// Connect two pins, creating or extending a net.
    Connect {
        /// One pin.
        a: PinId,
        /// The other pin.
        b: PinId,
    },

    /// Undo a connection between two pins sharing a net.
    Disconnect {
        /// One pin.
        a: PinId,
        /// The other pin.
        b: PinId,
    },

    /// Create a named net over unattached pins.
    CreateNet {
        /// New unique net id.
        id: NetId,
        /// Initial member pins (may be empty).
        #[serde(default)]
        pins: Vec<PinId>,
    },

    /// Fold `absorb`'s pins into `keep` and delete `absorb`.
    MergeNets {
        /// Surviving net.
        keep: NetId,
        /// Net to dissolve into `keep`.
        absorb: NetId,
    },

    /// Rename a component, net, or block. Component renames carry their
    /// pins' ids along (`"<component>.<pin>"`).
    RenameEntity {
        /// What is being renamed.
        kind: EntityKind,
        /// Current id.
        from: String,
        /// New id.
        to: String,
    },

    /// Declare a named block over existing components.
    AddBlock {
        /// The block, fully specified.
        block: Block,
    },

    /// Remove a block declaration (never its members).
    RemoveBlock {
        /// Block to remove.
        id: BlockId,
    },
}

impl EditOperation {
    /// Short tag for diagnostics and conflict reports.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AddComponent { .. } => "add_component",
            Self::RemoveComponent { .. } => "remove_component",
            Self::SetProperty { .. } => "set_property",
            Self::MoveComponent { .. } => "move_component",
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::CreateNet { .. } => "create_net",
            Self::MergeNets { .. } => "merge_nets",
            Self::RenameEntity { .. } => "rename_entity",
            Self::AddBlock { .. } => "add_block",
            Self::RemoveBlock { .. } => "remove_block",
        }
    }
}

/// Precondition violation; never silent, never partially applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    /// Component id already taken.
    #[error("component already exists: {0}")]
    DuplicateComponent(ComponentId),

    /// Component does not exist.
    #[error("unknown component: {0}")]
    UnknownComponent(ComponentId),

    /// Pin does not exist.
    #[error("unknown pin: {0}")]
    UnknownPin(PinId),

    /// Net does not exist.
    #[error("unknown net: {0}")]
    UnknownNet(NetId),

    /// Net id already taken.
    #[error("net already exists: {0}")]
    DuplicateNet(NetId),

    /// Block does not exist.
    #[error("unknown block: {0}")]
    UnknownBlock(BlockId),

    /// Block id already taken.
    #[error("block already exists: {0}")]
    DuplicateBlock(BlockId),

    /// Widths disagree across a prospective connection.
    #[error("width mismatch: {a} is {a_width} bits, {b} is {b_width} bits")]
    WidthMismatch {
        /// First pin.
        a: PinId,
        /// Its width.
        a_width: u8,
        /// Second pin.
        b: PinId,
        /// Its width.
        b_width: u8,
    },

    /// The connection would put two drivers on one net.
    #[error("shorted net: {net} would carry multiple output pins")]
    ShortedNet {
        /// The offending net.
        net: NetId,
    },

    /// The pins already share a net.
    #[error("pins already connected: {a} and {b}")]
    AlreadyConnected {
        /// First pin.
        a: PinId,
        /// Second pin.
        b: PinId,
    },

    /// The pins sit on different nets; `MergeNets` is the explicit tool.
    #[error("pins on different nets: {a} and {b} (use merge_nets)")]
    DifferentNets {
        /// First pin.
        a: PinId,
        /// Second pin.
        b: PinId,
    },

    /// Disconnect of pins that do not share a net.
    #[error("pins not connected: {a} and {b}")]
    NotConnected {
        /// First pin.
        a: PinId,
        /// Second pin.
        b: PinId,
    },

    /// Pin is already attached to a net (CreateNet requires unattached pins).
    #[error("pin already attached: {0}")]
    PinAttached(PinId),

    /// Property name not declared for the component's class.
    #[error("property '{name}' not declared for class of {component}")]
    PropertyUnknown {
        /// Target component.
        component: ComponentId,
        /// The undeclared property.
        name: String,
    },

    /// Property value outside the declared type/range.
    #[error("property '{name}' rejects value on {component}")]
    PropertyValueInvalid {
        /// Target component.
        component: ComponentId,
        /// The property.
        name: String,
    },

    /// Non-cascading removal of a component that still has attachments.
    #[error("component in use: {0} (links or block membership; use cascade)")]
    ComponentInUse(ComponentId),

    /// Rename target id already taken.
    #[error("name taken: {0}")]
    NameTaken(String),

    /// Built-in classes do not accept explicit pin declarations.
    #[error("class of {0} does not accept custom pins")]
    CustomPinsRejected(ComponentId),

    /// Block members must exist.
    #[error("block {block} references unknown component {component}")]
    BlockMemberMissing {
        /// The block being declared.
        block: BlockId,
        /// The missing member.
        component: ComponentId,
    },
}

impl Circuit {
    /// Validates and applies `op`, returning the new revision number.
    ///
    /// On failure the circuit is bit-identical to its pre-state.
    pub fn apply(&mut self, op: EditOperation) -> Result<u64, EditError> {
        let mut work = self.clone();
        let applied = work.apply_mut(op)?;
        work.revision += 1;
        work.log.push(RevisionEntry {
            revision: work.revision,
            op: applied,
        });
        *self = work;
        Ok(self.revision)
    }

    /// Applies a whole op sequence, stopping at the first failure.
    ///
    /// Returns the revision after the last applied op. The failure contract
    /// is all-or-nothing for the *sequence*: nothing is kept unless every op
    /// applies.
    pub fn apply_all(&mut self, ops: Vec<EditOperation>) -> Result<u64, EditError> {
        let mut work = self.clone();
        for op in ops {
            work.apply(op)?;
        }
        *self = work;
        Ok(self.revision)
    }

    /// Rebuilds a circuit by replaying `ops` onto the empty circuit.
    pub fn replay(ops: Vec<EditOperation>) -> Result<Self, EditError> {
        let mut circuit = Self::new();
        circuit.apply_all(ops)?;
        Ok(circuit)
    }

    fn apply_mut(&mut self, op: EditOperation) -> Result<EditOperation, EditError> {
        match op {
            EditOperation::AddComponent {
                id,
                class,
                properties,
                custom_pins,
            } => {
                self.add_component(&id, &class, &properties, &custom_pins)?;
                Ok(EditOperation::AddComponent {
                    id,
                    class,
                    properties,
                    custom_pins,
                })
            }
            EditOperation::RemoveComponent { id, cascade, .. } => {
                let detached = self.remove_component(&id, cascade)?;
                Ok(EditOperation::RemoveComponent {
                    id,
                    cascade,
                    detached,
                })
            }
            EditOperation::SetProperty {
                component,
                name,
                value,
            } => {
                self.set_property(&component, &name, &value)?;
                Ok(EditOperation::SetProperty {
                    component,
                    name,
                    value,
                })
            }
            EditOperation::MoveComponent { component, x, y } => {
                let c = self
                    .components
                    .get_mut(&component)
                    .ok_or_else(|| EditError::UnknownComponent(component.clone()))?;
                c.position = Some((x, y));
                Ok(EditOperation::MoveComponent { component, x, y })
            }
            EditOperation::Connect { a, b } => {
                self.connect(&a, &b)?;
                Ok(EditOperation::Connect { a, b })
            }
            EditOperation::Disconnect { a, b } => {
                self.disconnect(&a, &b)?;
                Ok(EditOperation::Disconnect { a, b })
            }
            EditOperation::CreateNet { id, pins } => {
                self.create_net(&id, &pins)?;
                Ok(EditOperation::CreateNet { id, pins })
            }
            EditOperation::MergeNets { keep, absorb } => {
                self.merge_nets(&keep, &absorb)?;
                Ok(EditOperation::MergeNets { keep, absorb })
            }
            EditOperation::RenameEntity { kind, from, to } => {
                self.rename(kind, &from, &to)?;
                Ok(EditOperation::RenameEntity { kind, from, to })
            }
            EditOperation::AddBlock { block } => {
                self.add_block(&block)?;
                Ok(EditOperation::AddBlock { block })
            }
            EditOperation::RemoveBlock { id } => {
                if self.blocks.remove(&id).is_none() {
                    return Err(EditError::UnknownBlock(id));
                }
                Ok(EditOperation::RemoveBlock { id })
            }
        }
    }

    fn add_component(
        &mut self,
        id: &ComponentId,
        class: &ComponentClass,
        properties: &std::collections::BTreeMap<String, PropertyValue>,
        custom_pins: &[CustomPin],
    ) -> Result<(), EditError> {
        if self.components.contains_key(id) {
            return Err(EditError::DuplicateComponent(id.clone()));
        }
        let templates = pin_templates(class);
        if !templates.is_empty() && !custom_pins.is_empty() {
            return Err(EditError::CustomPinsRejected(id.clone()));
        }
        for (name, value) in properties {
            check_property(id, class, name, value)?;
        }

        let mut pin_ids = Vec::new();
        let mut push_pin = |pins: &mut std::collections::BTreeMap<PinId, Pin>,
                            name: &str,
                            direction: PinDirection,
                            width: u8| {
            let pin_id = PinId(format!("{}.{}", id.as_str(), name));
            pins.insert(
                pin_id.clone(),
                Pin {
                    id: pin_id.clone(),
                    component: id.clone(),
                    name: name.to_owned(),
                    direction,
                    width,
                    net: None,
                },
            );
            pin_ids.push(pin_id);
        };
        for t in &templates {
            push_pin(&mut self.pins, t.name, t.direction, t.width);
        }
        for p in custom_pins {
            push_pin(&mut self.pins, &p.name, p.direction, p.width);
        }

        self.components.insert(
            id.clone(),
            Component {
                id: id.clone(),
                class: class.clone(),
                properties: properties.clone(),
                pins: pin_ids,
                position: None,
            },
        );
        Ok(())
    }

    fn remove_component(
        &mut self,
        id: &ComponentId,
        cascade: bool,
    ) -> Result<Vec<PinId>, EditError> {
        let component = self
            .components
            .get(id)
            .ok_or_else(|| EditError::UnknownComponent(id.clone()))?
            .clone();

        let attached: Vec<PinId> = component
            .pins
            .iter()
            .filter(|p| self.pins.get(p).is_some_and(|pin| pin.net.is_some()))
            .cloned()
            .collect();
        let in_blocks = self
            .blocks
            .values()
            .any(|b| b.components.contains(id));

        if !cascade && (!attached.is_empty() || in_blocks) {
            return Err(EditError::ComponentInUse(id.clone()));
        }

        for pin_id in &attached {
            self.detach_pin(pin_id);
        }
        for pin_id in &component.pins {
            self.pins.remove(pin_id);
        }
        for block in self.blocks.values_mut() {
            block.components.remove(id);
            block.ports.retain(|p| !component.pins.contains(p));
        }
        self.components.remove(id);
        Ok(attached)
    }

    /// Pulls a pin off its net, dissolving nets left with fewer than two pins.
    fn detach_pin(&mut self, pin_id: &PinId) {
        let Some(net_id) = self.pins.get(pin_id).and_then(|p| p.net.clone()) else {
            return;
        };
        if let Some(net) = self.nets.get_mut(&net_id) {
            net.pins.remove(pin_id);
            if net.pins.len() < 2 {
                let leftovers: Vec<PinId> = net.pins.iter().cloned().collect();
                self.nets.remove(&net_id);
                for p in leftovers {
                    if let Some(pin) = self.pins.get_mut(&p) {
                        pin.net = None;
                    }
                }
            }
        }
        if let Some(pin) = self.pins.get_mut(pin_id) {
            pin.net = None;
        }
    }

    fn set_property(
        &mut self,
        component: &ComponentId,
        name: &str,
        value: &PropertyValue,
    ) -> Result<(), EditError> {
        let class = self
            .components
            .get(component)
            .ok_or_else(|| EditError::UnknownComponent(component.clone()))?
            .class
            .clone();
        check_property(component, &class, name, value)?;
        if let Some(c) = self.components.get_mut(component) {
            c.properties.insert(name.to_owned(), value.clone());
        }
        Ok(())
    }

    fn net_would_short(&self, net: &Net) -> bool {
        let drivers = net
            .pins
            .iter()
            .filter_map(|p| self.pins.get(p))
            .filter(|p| matches!(p.direction, PinDirection::Output))
            .count();
        drivers > 1
    }

    fn connect(&mut self, a: &PinId, b: &PinId) -> Result<(), EditError> {
        let pin_a = self
            .pins
            .get(a)
            .ok_or_else(|| EditError::UnknownPin(a.clone()))?
            .clone();
        let pin_b = self
            .pins
            .get(b)
            .ok_or_else(|| EditError::UnknownPin(b.clone()))?
            .clone();
        if pin_a.width != pin_b.width {
            return Err(EditError::WidthMismatch {
                a: a.clone(),
                a_width: pin_a.width,
                b: b.clone(),
                b_width: pin_b.width,
            });
        }

        let net_id = match (&pin_a.net, &pin_b.net) {
            (Some(na), Some(nb)) if na == nb => {
                return Err(EditError::AlreadyConnected {
                    a: a.clone(),
                    b: b.clone(),
                })
            }
            (Some(_), Some(_)) => {
                return Err(EditError::DifferentNets {
                    a: a.clone(),
                    b: b.clone(),
                })
            }
            (Some(n), None) | (None, Some(n)) => n.clone(),
            (None, None) => {
                let id = self.fresh_net_id();
                self.nets.insert(
                    id.clone(),
                    Net {
                        id: id.clone(),
                        pins: std::collections::BTreeSet::new(),
                    },
                );
                id
            }
        };

        // Trial membership, then the short check on the would-be net.
        let mut trial = self
            .nets
            .get(&net_id)
            .ok_or_else(|| EditError::UnknownNet(net_id.clone()))?
            .clone();
        trial.pins.insert(a.clone());
        trial.pins.insert(b.clone());
        if self.net_would_short(&trial) {
            return Err(EditError::ShortedNet { net: net_id });
        }

        self.nets.insert(net_id.clone(), trial);
        if let Some(p) = self.pins.get_mut(a) {
            p.net = Some(net_id.clone());
        }
        if let Some(p) = self.pins.get_mut(b) {
            p.net = Some(net_id);
        }
        Ok(())
    }

    fn disconnect(&mut self, a: &PinId, b: &PinId) -> Result<(), EditError> {
        let net_a = self
            .pins
            .get(a)
            .ok_or_else(|| EditError::UnknownPin(a.clone()))?
            .net
            .clone();
        let net_b = self
            .pins
            .get(b)
            .ok_or_else(|| EditError::UnknownPin(b.clone()))?
            .net
            .clone();
        match (net_a, net_b) {
            (Some(na), Some(nb)) if na == nb => {
                let size = self.nets.get(&na).map_or(0, |n| n.pins.len());
                if size <= 2 {
                    // Dissolving the pair dissolves the net.
                    self.detach_pin(a);
                } else {
                    // Hyperedge: pull only `b` off, `a` stays attached.
                    self.detach_pin(b);
                }
                Ok(())
            }
            _ => Err(EditError::NotConnected {
                a: a.clone(),
                b: b.clone(),
            }),
        }
    }

    fn create_net(&mut self, id: &NetId, pins: &[PinId]) -> Result<(), EditError> {
        if self.nets.contains_key(id) {
            return Err(EditError::DuplicateNet(id.clone()));
        }
        let mut width: Option<u8> = None;
        for pin_id in pins {
            let pin = self
                .pins
                .get(pin_id)
                .ok_or_else(|| EditError::UnknownPin(pin_id.clone()))?;
            if pin.net.is_some() {
                return Err(EditError::PinAttached(pin_id.clone()));
            }
            if let Some(w) = width {
                if w != pin.width {
                    return Err(EditError::WidthMismatch {
                        a: pins[0].clone(),
                        a_width: w,
                        b: pin_id.clone(),
                        b_width: pin.width,
                    });
                }
            } else {
                width = Some(pin.width);
            }
        }
        let net = Net {
            id: id.clone(),
            pins: pins.iter().cloned().collect(),
        };
        if self.net_would_short(&net) {
            return Err(EditError::ShortedNet { net: id.clone() });
        }
        for pin_id in pins {
            if let Some(p) = self.pins.get_mut(pin_id) {
                p.net = Some(id.clone());
            }
        }
        self.nets.insert(id.clone(), net);
        Ok(())
    }

    fn merge_nets(&mut self, keep: &NetId, absorb: &NetId) -> Result<(), EditError> {
        let absorbed = self
            .nets
            .get(absorb)
            .ok_or_else(|| EditError::UnknownNet(absorb.clone()))?
            .clone();
        let mut union = self
            .nets
            .get(keep)
            .ok_or_else(|| EditError::UnknownNet(keep.clone()))?
            .clone();
        union.pins.extend(absorbed.pins.iter().cloned());
        if self.net_would_short(&union) {
            return Err(EditError::ShortedNet { net: keep.clone() });
        }
        let widths: std::collections::BTreeSet<u8> = union
            .pins
            .iter()
            .filter_map(|p| self.pins.get(p))
            .map(|p| p.width)
            .collect();
        if widths.len() > 1 {
            let mut it = union.pins.iter();
            let a = it.next().cloned().unwrap_or_else(|| PinId(String::new()));
            let b = it.next_back().cloned().unwrap_or_else(|| PinId(String::new()));
            let a_width = self.pins.get(&a).map_or(0, |p| p.width);
            let b_width = self.pins.get(&b).map_or(0, |p| p.width);
            return Err(EditError::WidthMismatch {
                a,
                a_width,
                b,
                b_width,
            });
        }
        for pin_id in &absorbed.pins {
            if let Some(p) = self.pins.get_mut(pin_id) {
                p.net = Some(keep.clone());
            }
        }
        self.nets.insert(keep.clone(), union);
        self.nets.remove(absorb);
        Ok(())
    }

    fn rename(&mut self, kind: EntityKind, from: &str, to: &str) -> Result<(), EditError> {
        match kind {
            EntityKind::Component => self.rename_component(
                &ComponentId(from.to_owned()),
                &ComponentId(to.to_owned()),
            ),
            EntityKind::Net => {
                let from = NetId(from.to_owned());
                let to = NetId(to.to_owned());
                if self.nets.contains_key(&to) {
                    return Err(EditError::NameTaken(to.0));
                }
                let mut net = self
                    .nets
                    .remove(&from)
                    .ok_or(EditError::UnknownNet(from))?;
                net.id = to.clone();
                for pin_id in &net.pins {
                    if let Some(p) = self.pins.get_mut(pin_id) {
                        p.net = Some(to.clone());
                    }
                }
                self.nets.insert(to, net);
                Ok(())
            }
            EntityKind::Block => {
                let from = BlockId(from.to_owned());
                let to = BlockId(to.to_owned());
                if self.blocks.contains_key(&to) {
                    return Err(EditError::NameTaken(to.0));
                }
                let mut block = self
                    .blocks
                    .remove(&from)
                    .ok_or(EditError::UnknownBlock(from))?;
                block.id = to.clone();
                self.blocks.insert(to, block);
                Ok(())
            }
        }
    }

    fn rename_component(
        &mut self,
        from: &ComponentId,
        to: &ComponentId,
    ) -> Result<(), EditError> {
        if self.components.contains_key(to) {
            return Err(EditError::NameTaken(to.0.clone()));
        }
        let mut component = self
            .components
            .remove(from)
            .ok_or_else(|| EditError::UnknownComponent(from.clone()))?;
        component.id = to.clone();

        let mut renamed_pins = Vec::with_capacity(component.pins.len());
        for old_pin_id in &component.pins {
            if let Some(mut pin) = self.pins.remove(old_pin_id) {
                let new_pin_id = PinId(format!("{}.{}", to.as_str(), pin.name));
                pin.id = new_pin_id.clone();
                pin.component = to.clone();
                if let Some(net_id) = &pin.net {
                    if let Some(net) = self.nets.get_mut(net_id) {
                        net.pins.remove(old_pin_id);
                        net.pins.insert(new_pin_id.clone());
                    }
                }
                for block in self.blocks.values_mut() {
                    for port in &mut block.ports {
                        if port == old_pin_id {
                            *port = new_pin_id.clone();
                        }
                    }
                }
                self.pins.insert(new_pin_id.clone(), pin);
                renamed_pins.push(new_pin_id);
            }
        }
        component.pins = renamed_pins;

        for block in self.blocks.values_mut() {
            if block.components.remove(from) {
                block.components.insert(to.clone());
            }
        }
        self.components.insert(to.clone(), component);
        Ok(())
    }

    fn add_block(&mut self, block: &Block) -> Result<(), EditError> {
        if self.blocks.contains_key(&block.id) {
            return Err(EditError::DuplicateBlock(block.id.clone()));
        }
        for member in &block.components {
            if !self.components.contains_key(member) {
                return Err(EditError::BlockMemberMissing {
                    block: block.id.clone(),
                    component: member.clone(),
                });
            }
        }
        for port in &block.ports {
            if !self.pins.contains_key(port) {
                return Err(EditError::UnknownPin(port.clone()));
            }
        }
        self.blocks.insert(block.id.clone(), block.clone());
        Ok(())
    }

    fn fresh_net_id(&self) -> NetId {
        let mut n = self.nets.len() + 1;
        loop {
            let candidate = NetId(format!("n{n}"));
            if !self.nets.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn check_property(
    component: &ComponentId,
    class: &ComponentClass,
    name: &str,
    value: &PropertyValue,
) -> Result<(), EditError> {
    // Custom classes are schema-free.
    if matches!(class, ComponentClass::Custom(_)) {
        return Ok(());
    }
    let specs = property_specs(class);
    let spec = specs
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| EditError::PropertyUnknown {
            component: component.clone(),
            name: name.to_owned(),
        })?;
    if !spec.kind.accepts(value) {
        return Err(EditError::PropertyValueInvalid {
            component: component.clone(),
            name: name.to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn add(circuit: &mut Circuit, id: &str, class: ComponentClass) -> u64 {
        circuit
            .apply(EditOperation::AddComponent {
                id: id.into(),
                class,
                properties: std::collections::BTreeMap::new(),
                custom_pins: Vec::new(),
            })
            .unwrap()
    }

    fn pin(id: &str) -> PinId {
        id.into()
    }

    #[test]
    fn add_component_materializes_class_pins() {
        let mut c = Circuit::new();
        let rev = add(&mut c, "x1", ComponentClass::Xor);
        assert_eq!(rev, 1);
        assert!(c.pin(&pin("x1.a")).is_some());
        assert!(c.pin(&pin("x1.b")).is_some());
        assert_eq!(
            c.pin(&pin("x1.out")).unwrap().direction,
            PinDirection::Output
        );
    }

    #[test]
    fn duplicate_component_is_rejected() {
        let mut c = Circuit::new();
        add(&mut c, "x1", ComponentClass::Xor);
        let err = c
            .apply(EditOperation::AddComponent {
                id: "x1".into(),
                class: ComponentClass::And,
                properties: std::collections::BTreeMap::new(),
                custom_pins: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, EditError::DuplicateComponent(_)));
        assert_eq!(c.revision(), 1);
    }

    #[test]
    fn connect_creates_a_net_and_checks_for_shorts() {
        let mut c = Circuit::new();
        add(&mut c, "c1", ComponentClass::Constant);
        add(&mut c, "c2", ComponentClass::Constant);
        add(&mut c, "b1", ComponentClass::Buffer);
        c.apply(EditOperation::Connect {
            a: pin("c1.out"),
            b: pin("b1.in"),
        })
        .unwrap();
        let net = c.pin(&pin("c1.out")).unwrap().net.clone().unwrap();
        assert_eq!(c.net(&net).unwrap().pins.len(), 2);

        // A second driver on the same net is a short.
        let err = c
            .apply(EditOperation::Connect {
                a: pin("c2.out"),
                b: pin("b1.in"),
            })
            .unwrap_err();
        assert!(matches!(err, EditError::ShortedNet { .. }));
    }

    #[test]
    fn connect_rejects_width_mismatch() {
        let mut c = Circuit::new();
        add(&mut c, "k", ComponentClass::Custom("wide".into()));
        c.apply(EditOperation::AddComponent {
            id: "w".into(),
            class: ComponentClass::Custom("w8".into()),
            properties: std::collections::BTreeMap::new(),
            custom_pins: vec![CustomPin {
                name: "bus".into(),
                direction: PinDirection::Output,
                width: 8,
            }],
        })
        .unwrap();
        add(&mut c, "b1", ComponentClass::Buffer);
        let err = c
            .apply(EditOperation::Connect {
                a: pin("w.bus"),
                b: pin("b1.in"),
            })
            .unwrap_err();
        assert!(matches!(err, EditError::WidthMismatch { .. }));
    }

    #[test]
    fn failed_edit_leaves_circuit_bit_identical() {
        let mut c = Circuit::new();
        add(&mut c, "c1", ComponentClass::Constant);
        add(&mut c, "b1", ComponentClass::Buffer);
        c.apply(EditOperation::Connect {
            a: pin("c1.out"),
            b: pin("b1.in"),
        })
        .unwrap();
        let before = c.clone();
        let err = c
            .apply(EditOperation::Connect {
                a: pin("c1.out"),
                b: pin("b1.in"),
            })
            .unwrap_err();
        assert!(matches!(err, EditError::AlreadyConnected { .. }));
        assert_eq!(c, before);
    }

    #[test]
    fn remove_component_without_cascade_requires_detachment() {
        let mut c = Circuit::new();
        add(&mut c, "c1", ComponentClass::Constant);
        add(&mut c, "b1", ComponentClass::Buffer);
        c.apply(EditOperation::Connect {
            a: pin("c1.out"),
            b: pin("b1.in"),
        })
        .unwrap();
        let err = c
            .apply(EditOperation::RemoveComponent {
                id: "c1".into(),
                cascade: false,
                detached: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, EditError::ComponentInUse(_)));

        let rev = c
            .apply(EditOperation::RemoveComponent {
                id: "c1".into(),
                cascade: true,
                detached: Vec::new(),
            })
            .unwrap();
        assert_eq!(rev, 4);
        // The cascade is recorded in the log entry.
        let logged = &c.log().last().unwrap().op;
        assert!(matches!(
            logged,
            EditOperation::RemoveComponent { detached, .. } if detached == &vec![pin("c1.out")]
        ));
        // The two-pin net dissolved with it.
        assert_eq!(c.nets().count(), 0);
        assert!(c.pin(&pin("b1.in")).unwrap().net.is_none());
    }

    #[test]
    fn set_property_validates_against_the_class_schema() {
        let mut c = Circuit::new();
        add(&mut c, "k", ComponentClass::Constant);
        c.apply(EditOperation::SetProperty {
            component: "k".into(),
            name: "width".into(),
            value: PropertyValue::Int(8),
        })
        .unwrap();
        let err = c
            .apply(EditOperation::SetProperty {
                component: "k".into(),
                name: "width".into(),
                value: PropertyValue::Int(0),
            })
            .unwrap_err();
        assert!(matches!(err, EditError::PropertyValueInvalid { .. }));
        let err = c
            .apply(EditOperation::SetProperty {
                component: "k".into(),
                name: "wobble".into(),
                value: PropertyValue::Int(1),
            })
            .unwrap_err();
        assert!(matches!(err, EditError::PropertyUnknown { .. }));
    }

    #[test]
    fn rename_component_carries_pins_nets_and_blocks() {
        let mut c = Circuit::new();
        add(&mut c, "c1", ComponentClass::Constant);
        add(&mut c, "b1", ComponentClass::Buffer);
        c.apply(EditOperation::Connect {
            a: pin("c1.out"),
            b: pin("b1.in"),
        })
        .unwrap();
        c.apply(EditOperation::AddBlock {
            block: Block {
                id: "blk".into(),
                name: "front".into(),
                components: ["c1".into()].into_iter().collect(),
                ports: vec![pin("c1.out")],
            },
        })
        .unwrap();
        c.apply(EditOperation::RenameEntity {
            kind: EntityKind::Component,
            from: "c1".into(),
            to: "seed".into(),
        })
        .unwrap();

        assert!(c.component(&"seed".into()).is_some());
        assert!(c.pin(&pin("seed.out")).is_some());
        assert!(c.pin(&pin("c1.out")).is_none());
        let net_id = c.pin(&pin("seed.out")).unwrap().net.clone().unwrap();
        assert!(c.net(&net_id).unwrap().pins.contains(&pin("seed.out")));
        let blk = c.block(&"blk".into()).unwrap();
        assert!(blk.components.contains(&ComponentId::from("seed")));
        assert_eq!(blk.ports, vec![pin("seed.out")]);
    }

    #[test]
    fn disconnect_dissolves_two_pin_nets() {
        let mut c = Circuit::new();
        add(&mut c, "c1", ComponentClass::Constant);
        add(&mut c, "b1", ComponentClass::Buffer);
        c.apply(EditOperation::Connect {
            a: pin("c1.out"),
            b: pin("b1.in"),
        })
        .unwrap();
        c.apply(EditOperation::Disconnect {
            a: pin("c1.out"),
            b: pin("b1.in"),
        })
        .unwrap();
        assert_eq!(c.nets().count(), 0);
        let err = c
            .apply(EditOperation::Disconnect {
                a: pin("c1.out"),
                b: pin("b1.in"),
            })
            .unwrap_err();
        assert!(matches!(err, EditError::NotConnected { .. }));
    }

    #[test]
    fn replay_reproduces_the_same_circuit() {
        let mut c = Circuit::new();
        add(&mut c, "c1", ComponentClass::Constant);
        add(&mut c, "x1", ComponentClass::Xor);
        c.apply(EditOperation::Connect {
            a: pin("c1.out"),
            b: pin("x1.a"),
        })
        .unwrap();
        let ops: Vec<EditOperation> = c.log().iter().map(|e| e.op.clone()).collect();
        let replayed = Circuit::replay(ops).unwrap();
        assert_eq!(replayed, c);
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Class registry: pin templates and property schemas per component class.
//!
//! `SetProperty` validates against this registry - a property name must be
//! declared for the class and the value must fit the declared type/range.
//! Custom classes declare no schema; they accept any property (the editing
//! surface for plugins) and require explicit pin declarations.

use crate::model::{ComponentClass, PinDirection, PropertyValue};

/// A pin declared by a component class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinTemplate {
    /// Pin name within the component.
    pub name: &'static str,
    /// Direction relative to the component.
    pub direction: PinDirection,
    /// Width in bits.
    pub width: u8,
}

const fn input(name: &'static str) -> PinTemplate {
    PinTemplate {
        name,
        direction: PinDirection::Input,
        width: 1,
    }
}

const fn output(name: &'static str) -> PinTemplate {
    PinTemplate {
        name,
        direction: PinDirection::Output,
        width: 1,
    }
}

/// Value constraint for a declared property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    /// Integer within an inclusive range.
    Int {
        /// Lower bound.
        min: i64,
        /// Upper bound.
        max: i64,
    },
    /// Float within an inclusive range.
    Float {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Boolean flag.
    Bool,
    /// Free text.
    Text,
}

impl PropertyKind {
    /// Whether `value` satisfies this constraint.
    #[must_use]
    pub fn accepts(&self, value: &PropertyValue) -> bool {
        match (self, value) {
            (Self::Int { min, max }, PropertyValue::Int(v)) => (*min..=*max).contains(v),
            (Self::Float { min, max }, PropertyValue::Float(v)) => *v >= *min && *v <= *max,
            (Self::Bool, PropertyValue::Bool(_)) | (Self::Text, PropertyValue::Text(_)) => true,
            _ => false,
        }
    }
}

/// A property declared by a component class.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    /// Property name.
    pub name: &'static str,
    /// Value constraint.
    pub kind: PropertyKind,
}

/// Pins a fresh instance of `class` owns, in declaration order.
///
/// Custom classes return an empty template; their pins arrive through
/// explicit edit operations.
#[must_use]
pub fn pin_templates(class: &ComponentClass) -> Vec<PinTemplate> {
    match class {
        ComponentClass::Constant | ComponentClass::DcSource => vec![output("out")],
        ComponentClass::Buffer | ComponentClass::Not | ComponentClass::RcLowPass => {
            vec![input("in"), output("out")]
        }
        ComponentClass::And | ComponentClass::Or | ComponentClass::Xor => {
            vec![input("a"), input("b"), output("out")]
        }
        ComponentClass::Register => vec![
            input("d"),
            input("en"),
            input("clr"),
            output("q"),
        ],
        ComponentClass::Synchronizer => vec![input("d"), output("q")],
        ComponentClass::Probe => vec![input("in")],
        ComponentClass::Custom(_) => Vec::new(),
    }
}

/// Properties `class` declares.
#[must_use]
pub fn property_specs(class: &ComponentClass) -> Vec<PropertySpec> {
    match class {
        ComponentClass::Constant => vec![
            PropertySpec {
                name: "value",
                kind: PropertyKind::Int {
                    min: 0,
                    max: i64::MAX,
                },
            },
            PropertySpec {
                name: "width",
                kind: PropertyKind::Int { min: 1, max: 64 },
            },
        ],
        ComponentClass::Register | ComponentClass::Synchronizer => {
            let mut specs = vec![PropertySpec {
                name: "clock",
                kind: PropertyKind::Text,
            }];
            if matches!(class, ComponentClass::Synchronizer) {
                specs.push(PropertySpec {
                    name: "stages",
                    kind: PropertyKind::Int { min: 2, max: 8 },
                });
            }
            specs
        }
        ComponentClass::DcSource => vec![PropertySpec {
            name: "level",
            kind: PropertyKind::Float {
                min: -1_000.0,
                max: 1_000.0,
            },
        }],
        ComponentClass::RcLowPass => vec![PropertySpec {
            name: "rc",
            kind: PropertyKind::Float {
                min: 1e-9,
                max: 1e3,
            },
        }],
        ComponentClass::Buffer
        | ComponentClass::Not
        | ComponentClass::And
        | ComponentClass::Or
        | ComponentClass::Xor
        | ComponentClass::Probe
        | ComponentClass::Custom(_) => Vec::new(),
    }
}

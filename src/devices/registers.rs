//! Single-address views handed out by a device. They do not own storage.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterType {
    Coil,
    Discrete,
    Holding,
    Input,
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegisterType::Coil => "coil",
            RegisterType::Discrete => "discrete input",
            RegisterType::Holding => "holding register",
            RegisterType::Input => "input register",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coil {
    pub address: u16,
    pub value: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscreteInput {
    pub address: u16,
    pub value: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldingRegister {
    pub address: u16,
    pub value: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRegister {
    pub address: u16,
    pub value: u16,
}

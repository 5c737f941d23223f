//! Remote property accessors.
//!
//! Solver objects expose settings as string properties addressed by
//! `(tab, server, name)`. A [`PropertyDescriptor`] names one setting statically;
//! binding it to a host and server gives a [`Property`] with `get` and `set`.

use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Property tab holding analysis setup settings.
pub const HFSS_TAB: &str = "HfssTab";

/// Static address of one property within a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyDescriptor {
    pub tab: &'static str,
    pub name: &'static str,
}

impl PropertyDescriptor {
    pub const fn new(tab: &'static str, name: &'static str) -> Self {
        Self { tab, name }
    }
}

pub const PASSES: PropertyDescriptor = PropertyDescriptor::new(HFSS_TAB, "Passes");
pub const PERCENT_REFINEMENT: PropertyDescriptor = PropertyDescriptor::new(HFSS_TAB, "Percent Refinement");
pub const BASIS_ORDER: PropertyDescriptor = PropertyDescriptor::new(HFSS_TAB, "Basis Order");
pub const SOLUTION_FREQ: PropertyDescriptor = PropertyDescriptor::new(HFSS_TAB, "Solution Freq");
pub const DELTA_ENERGY: PropertyDescriptor = PropertyDescriptor::new(HFSS_TAB, "Delta Energy");
pub const MIN_FREQ: PropertyDescriptor = PropertyDescriptor::new(HFSS_TAB, "Min Freq");
pub const MODES: PropertyDescriptor = PropertyDescriptor::new(HFSS_TAB, "Modes");
pub const DELTA_F: PropertyDescriptor = PropertyDescriptor::new(HFSS_TAB, "Delta F");

/// Object whose properties can be read and written, typically a design.
pub trait PropertyHost {
    fn get_property_value(&self, tab: &str, server: &str, name: &str) -> EngineResult<String>;

    fn set_property_value(&mut self, tab: &str, server: &str, name: &str, value: &str) -> EngineResult<()>;
}

/// One property bound to a host and server.
pub struct Property<'h, H: ?Sized> {
    host: &'h mut H,
    descriptor: PropertyDescriptor,
    server: String,
}

impl<'h, H: PropertyHost + ?Sized> Property<'h, H> {
    pub fn new(host: &'h mut H, descriptor: PropertyDescriptor, server: impl Into<String>) -> Self {
        Self {
            host,
            descriptor,
            server: server.into(),
        }
    }

    pub fn descriptor(&self) -> PropertyDescriptor {
        self.descriptor
    }

    pub fn get(&self) -> EngineResult<String> {
        self.host
            .get_property_value(self.descriptor.tab, &self.server, self.descriptor.name)
    }

    pub fn set(&mut self, value: impl ToString) -> EngineResult<()> {
        let value = value.to_string();
        debug!(server = %self.server, name = self.descriptor.name, value = %value, "setting property");
        self.host
            .set_property_value(self.descriptor.tab, &self.server, self.descriptor.name, &value)
    }
}

/// Solution type of an analysis setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetupKind {
    DrivenModal,
    Eigenmode,
}

impl SetupKind {
    /// Properties a setup of this kind exposes.
    pub fn properties(&self) -> &'static [PropertyDescriptor] {
        match self {
            SetupKind::DrivenModal => &[PASSES, PERCENT_REFINEMENT, BASIS_ORDER, SOLUTION_FREQ, DELTA_ENERGY],
            SetupKind::Eigenmode => &[PASSES, PERCENT_REFINEMENT, BASIS_ORDER, MIN_FREQ, MODES, DELTA_F],
        }
    }
}

/// An analysis setup within a design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setup {
    pub name: String,
    pub kind: SetupKind,
}

impl Setup {
    pub fn new(name: impl Into<String>, kind: SetupKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Property server of this setup.
    pub fn server(&self) -> String {
        format!("AnalysisSetup:{}", self.name)
    }

    /// Name of the converged adaptive solution.
    pub fn solution_name(&self) -> String {
        format!("{} : LastAdaptive", self.name)
    }

    /// Bind `descriptor` on `host`, if this kind of setup has it.
    pub fn property<'h, H: PropertyHost + ?Sized>(
        &self,
        host: &'h mut H,
        descriptor: PropertyDescriptor,
    ) -> Option<Property<'h, H>> {
        if self.kind.properties().contains(&descriptor) {
            Some(Property::new(host, descriptor, self.server()))
        } else {
            None
        }
    }
}

//! Per-kernel provider facade.
//!
//! An [`OsProvider`] knows how to recognise one kernel in a firmware image
//! and how to build its [`Model`]. Detection runs continuously while the
//! target executes, so none of the detection calls may fail: an accessor
//! error during detection simply means "not yet".

use crate::context::{ContextProvider, SavedRegister};
use crate::error::TraversalFault;
use crate::model::{Model, TableView};
use crate::target::TargetAccess;
use crate::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Capability set one kernel integration exposes to the host.
pub trait OsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the image contains every symbol the integration needs.
    fn symbols_loaded(&self, target: &dyn TargetAccess) -> bool;

    /// Whether the kernel has started. Any accessor failure reads as `false`.
    fn initialised(&self, target: &mut dyn TargetAccess) -> bool;

    fn context_provider(&self) -> Option<Arc<dyn ContextProvider>>;

    /// Build the tables. Must not touch the target.
    fn data_model(&self) -> Model;
}

/// Where a kernel stands in detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionState {
    Unchecked,
    /// Terminal until the symbol set is reloaded.
    SymbolsAbsent,
    NotInitialised,
    Initialised,
}

impl fmt::Display for DetectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unchecked => "unchecked",
            Self::SymbolsAbsent => "symbols absent",
            Self::NotInitialised => "not initialised",
            Self::Initialised => "initialised",
        })
    }
}

/// Detection state machine for one provider.
pub struct Detector {
    provider: Arc<dyn OsProvider>,
    state: DetectionState,
}

impl Detector {
    pub fn new(provider: Arc<dyn OsProvider>) -> Self {
        Self { provider, state: DetectionState::Unchecked }
    }

    pub const fn state(&self) -> DetectionState {
        self.state
    }

    pub fn provider(&self) -> &Arc<dyn OsProvider> {
        &self.provider
    }

    /// Advance the state machine against the current target state.
    pub fn poll(&mut self, target: &mut dyn TargetAccess) -> DetectionState {
        let next = match self.state {
            DetectionState::SymbolsAbsent => DetectionState::SymbolsAbsent,
            DetectionState::Unchecked if !self.provider.symbols_loaded(target) => DetectionState::SymbolsAbsent,
            _ if self.provider.initialised(target) => DetectionState::Initialised,
            _ => DetectionState::NotInitialised,
        };
        if next != self.state {
            log::info!("{}: {} -> {}", self.provider.name(), self.state, next);
            self.state = next;
        }
        next
    }

    /// Forget everything learned from the previous symbol set.
    pub fn reload(&mut self) {
        self.state = DetectionState::Unchecked;
    }
}

/// Asked for tables while the kernel is not running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kernel} is not ready ({state})")]
pub struct NotReady {
    pub kernel: String,
    pub state: DetectionState,
}

/// The kernel chosen for one debug session.
///
/// Selected once at attach time and handed to whoever needs it; there is no
/// process-wide active kernel.
pub struct Attachment {
    detector: Detector,
    model: Option<Model>,
}

impl Attachment {
    pub fn new(provider: Arc<dyn OsProvider>) -> Self {
        Self { detector: Detector::new(provider), model: None }
    }

    /// Pick the first provider whose symbols are present and run its first
    /// detection poll.
    pub fn detect(providers: &[Arc<dyn OsProvider>], target: &mut dyn TargetAccess) -> Option<Self> {
        let provider = providers.iter().find(|p| p.symbols_loaded(target))?;
        log::info!("Detected {}", provider.name());
        let mut attachment = Self::new(Arc::clone(provider));
        attachment.poll(target);
        Some(attachment)
    }

    pub fn kernel(&self) -> &str {
        self.detector.provider().name()
    }

    pub const fn state(&self) -> DetectionState {
        self.detector.state()
    }

    pub const fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    /// Poll detection, building the model when the kernel comes up and
    /// dropping it when it goes away.
    pub fn poll(&mut self, target: &mut dyn TargetAccess) -> DetectionState {
        let state = self.detector.poll(target);
        match (state, self.model.is_some()) {
            (DetectionState::Initialised, false) => {
                let model = self.detector.provider().data_model();
                log::debug!("Built {} model with {} tables", model.name(), model.tables().len());
                self.model = Some(model);
            }
            (DetectionState::Initialised, true) | (_, false) => {}
            (_, true) => {
                log::debug!("Dropping {} model", self.kernel());
                self.model = None;
            }
        }
        state
    }

    fn ready_model(&self) -> Result<&Model, NotReady> {
        match &self.model {
            Some(model) if self.state() == DetectionState::Initialised => Ok(model),
            _ => Err(NotReady { kernel: self.kernel().to_string(), state: self.state() }),
        }
    }

    pub fn refresh(&self, target: &mut dyn TargetAccess) -> Result<Vec<TableView>, NotReady> {
        Ok(self.ready_model()?.refresh(target))
    }

    /// `Ok(None)` when the model has no table `id`.
    pub fn refresh_table(&self, id: &str, target: &mut dyn TargetAccess) -> Result<Option<TableView>, NotReady> {
        Ok(self.ready_model()?.refresh_table(id, target))
    }

    /// Registers saved by a suspended task, or `None` when the kernel has no
    /// context support.
    pub fn context(
        &self,
        target: &mut dyn TargetAccess,
        task: Address,
    ) -> Option<Result<Vec<SavedRegister>, TraversalFault>> {
        let provider = self.detector.provider().context_provider()?;
        Some(provider.saved_registers(target, task))
    }

    pub fn reload(&mut self) {
        self.detector.reload();
        self.model = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TableError;
    use crate::memory::MemoryImage;
    use crate::model::{Cell, FieldKind, Record, Schema, Table};
    use crate::symbols::SymbolTable;
    use crate::target::{LayoutTarget, TypeRegistry};

    struct Flag {
        schema: Schema,
    }

    impl Table for Flag {
        fn schema(&self) -> &Schema {
            &self.schema
        }

        fn records(&self, target: &mut dyn TargetAccess) -> Result<Vec<Record>, TableError> {
            let running = target.evaluate("running")?.as_u64()?;
            Ok(vec![self.schema.record(vec![Cell::decimal(running)])?])
        }
    }

    struct Toy;

    impl OsProvider for Toy {
        fn name(&self) -> &str {
            "toy"
        }

        fn symbols_loaded(&self, target: &dyn TargetAccess) -> bool {
            crate::format::all_symbols_exist(target, &["running"])
        }

        fn initialised(&self, target: &mut dyn TargetAccess) -> bool {
            target.evaluate("running").and_then(|v| v.as_u64()).is_ok_and(|v| v == 1)
        }

        fn context_provider(&self) -> Option<Arc<dyn ContextProvider>> {
            None
        }

        fn data_model(&self) -> Model {
            let schema = Schema::builder("flag").primary("running", "Running", FieldKind::Decimal).build().unwrap();
            Model::new("toy", vec![Box::new(Flag { schema })])
        }
    }

    fn target(with_symbol: bool) -> LayoutTarget<MemoryImage> {
        let mut symbols = SymbolTable::new();
        if with_symbol {
            symbols.insert("running", Address::new(0x100));
        }
        let mut memory = MemoryImage::new();
        memory.write_u8(Address::new(0x100), 0);
        LayoutTarget::new(symbols, TypeRegistry::new().with_global("running", "u8"), memory)
    }

    #[test]
    fn test_detector_transitions() {
        let mut t = target(true);
        let mut detector = Detector::new(Arc::new(Toy));
        assert_eq!(detector.state(), DetectionState::Unchecked);
        assert_eq!(detector.poll(&mut t), DetectionState::NotInitialised);

        t.memory_mut().write_u8(Address::new(0x100), 1);
        assert_eq!(detector.poll(&mut t), DetectionState::Initialised);

        t.memory_mut().write_u8(Address::new(0x100), 0);
        assert_eq!(detector.poll(&mut t), DetectionState::NotInitialised);
    }

    #[test]
    fn test_symbols_absent_is_sticky_until_reload() {
        let mut t = target(false);
        let mut detector = Detector::new(Arc::new(Toy));
        assert_eq!(detector.poll(&mut t), DetectionState::SymbolsAbsent);

        // Symbols appear without a reload: still absent.
        t = target(true);
        assert_eq!(detector.poll(&mut t), DetectionState::SymbolsAbsent);

        detector.reload();
        assert_eq!(detector.poll(&mut t), DetectionState::NotInitialised);
    }

    #[test]
    fn test_unreadable_flag_is_not_initialised() {
        let mut symbols = SymbolTable::new();
        symbols.insert("running", Address::new(0x900));
        let mut t = LayoutTarget::new(symbols, TypeRegistry::new().with_global("running", "u8"), MemoryImage::new());
        let mut detector = Detector::new(Arc::new(Toy));
        assert_eq!(detector.poll(&mut t), DetectionState::NotInitialised);
    }

    #[test]
    fn test_attachment_model_lifecycle() {
        let providers: Vec<Arc<dyn OsProvider>> = vec![Arc::new(Toy)];
        assert!(Attachment::detect(&providers, &mut target(false)).is_none());

        let mut t = target(true);
        let mut attachment = Attachment::detect(&providers, &mut t).unwrap();
        assert_eq!(attachment.kernel(), "toy");
        assert_eq!(attachment.state(), DetectionState::NotInitialised);
        assert!(attachment.model().is_none());
        let err = attachment.refresh(&mut t).unwrap_err();
        assert_eq!(err.state, DetectionState::NotInitialised);

        t.memory_mut().write_u8(Address::new(0x100), 1);
        assert_eq!(attachment.poll(&mut t), DetectionState::Initialised);
        let views = attachment.refresh(&mut t).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].records()[0].cells(), &[Cell::decimal(1)]);
        assert!(attachment.refresh_table("flag", &mut t).unwrap().is_some());
        assert!(attachment.refresh_table("other", &mut t).unwrap().is_none());
        assert!(attachment.context(&mut t, Address::new(0x100)).is_none());

        t.memory_mut().write_u8(Address::new(0x100), 0);
        attachment.poll(&mut t);
        assert!(attachment.model().is_none());

        attachment.reload();
        assert_eq!(attachment.state(), DetectionState::Unchecked);
    }
}

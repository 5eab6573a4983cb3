use super::prepare::{prepare, PreparedTable};
use super::spec::KernelSpec;
use super::table::SpecTable;
use crate::config::Limits;
use crate::context::{ContextProvider, SavedRegister, StackedContext};
use crate::error::{SpecError, TraversalFault};
use crate::format::all_symbols_exist;
use crate::model::{Model, Table};
use crate::provider::OsProvider;
use crate::target::{TargetAccess, TypeRegistry};
use crate::Address;
use std::sync::Arc;

/// [`OsProvider`] driven by a checked [`KernelSpec`].
///
/// Every read goes through the spec's own [`TypeRegistry`], the one it was
/// checked against, whatever the target decoded with before.
pub struct SpecProvider {
    spec: Arc<KernelSpec>,
    types: Arc<TypeRegistry>,
    tables: Vec<Arc<PreparedTable>>,
    context: Option<Arc<dyn ContextProvider>>,
    limits: Limits,
}

impl std::fmt::Debug for SpecProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecProvider")
            .field("kernel", &self.spec.name)
            .field("tables", &self.tables.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl SpecProvider {
    /// Check `spec` and build a provider for it. Any inconsistency in the
    /// spec is reported here rather than on the first refresh.
    pub fn new(spec: KernelSpec, limits: Limits) -> Result<Self, SpecError> {
        let prepared = prepare(&spec)?;
        let types = Arc::new(spec.types.clone());
        let context = prepared.context.map(|stacked| {
            Arc::new(SpecContext { types: Arc::clone(&types), stacked }) as Arc<dyn ContextProvider>
        });
        Ok(Self {
            tables: prepared.tables.into_iter().map(Arc::new).collect(),
            spec: Arc::new(spec),
            types,
            context,
            limits,
        })
    }

    pub fn spec(&self) -> &KernelSpec {
        &self.spec
    }
}

impl OsProvider for SpecProvider {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn symbols_loaded(&self, target: &dyn TargetAccess) -> bool {
        all_symbols_exist(target, &self.spec.required_symbols)
    }

    fn initialised(&self, target: &mut dyn TargetAccess) -> bool {
        target.use_types(&self.types);
        for check in &self.spec.running {
            match target.evaluate(&check.expr).and_then(|v| v.as_u64()) {
                Ok(value) if check.expect.holds(value) => {}
                Ok(value) => {
                    log::debug!("{}: `{}` is {value}, kernel not running", self.spec.name, check.expr);
                    return false;
                }
                Err(err) => {
                    log::debug!("{}: cannot evaluate `{}`: {err}", self.spec.name, check.expr);
                    return false;
                }
            }
        }
        true
    }

    fn context_provider(&self) -> Option<Arc<dyn ContextProvider>> {
        self.context.clone()
    }

    fn data_model(&self) -> Model {
        let tables = self
            .tables
            .iter()
            .map(|table| {
                Box::new(SpecTable::new(Arc::clone(table), Arc::clone(&self.types), self.limits)) as Box<dyn Table>
            })
            .collect();
        Model::new(&self.spec.name, tables)
    }
}

/// Stacked context read with the layouts of the kernel that declared it.
struct SpecContext {
    types: Arc<TypeRegistry>,
    stacked: StackedContext,
}

impl ContextProvider for SpecContext {
    fn saved_registers(
        &self,
        target: &mut dyn TargetAccess,
        task: Address,
    ) -> Result<Vec<SavedRegister>, TraversalFault> {
        target.use_types(&self.types);
        self.stacked.saved_registers(target, task)
    }
}

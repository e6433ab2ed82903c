//! Module registrations and their instance slots.
//!
//! The table only records state; it never calls into module code. Core
//! moves a slot into a transient state under the lock, runs factories and
//! lifecycle hooks unlocked, then commits or rolls back.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::CoreError;
use crate::contracts::{Module, ModuleFactory};

pub(crate) enum InstanceSlot {
    Starting,
    Running(Arc<dyn Module>),
    Stopping(Arc<dyn Module>),
}

impl InstanceSlot {
    fn label(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running(_) => "running",
            Self::Stopping(_) => "stopping",
        }
    }
}

pub(crate) struct ModuleRecord {
    factory: ModuleFactory,
    instances: HashMap<String, InstanceSlot>,
}

/// What `start_module` should do for a given pair.
pub(crate) enum StartPlan {
    /// Slot reserved; build a fresh instance with this factory.
    Build(ModuleFactory),
    /// Already running; deliver props instead.
    Running(Arc<dyn Module>),
    /// Slot is mid-transition.
    Busy(&'static str),
}

pub(crate) enum StopPlan {
    UnknownModule,
    NotRunning,
    Busy(&'static str),
    /// Slot moved to stopping; destroy this instance.
    Destroy(Arc<dyn Module>),
}

#[derive(Default)]
pub(crate) struct ModuleTable {
    order: Vec<String>,
    records: HashMap<String, ModuleRecord>,
}

impl std::fmt::Debug for ModuleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleTable")
            .field("modules", &self.order)
            .field("running", &self.running())
            .finish()
    }
}

impl ModuleTable {
    pub(crate) fn register(&mut self, id: &str, factory: ModuleFactory) -> Result<(), CoreError> {
        if id.trim().is_empty() {
            return Err(CoreError::InvalidModuleId);
        }
        if self.records.contains_key(id) {
            return Err(CoreError::DuplicateModule(id.to_string()));
        }
        self.order.push(id.to_string());
        self.records.insert(
            id.to_string(),
            ModuleRecord {
                factory,
                instances: HashMap::new(),
            },
        );
        Ok(())
    }

    pub(crate) fn begin_start(
        &mut self,
        id: &str,
        instance_id: &str,
    ) -> Result<StartPlan, CoreError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| CoreError::UnknownModule(id.to_string()))?;
        match record.instances.get(instance_id) {
            Some(InstanceSlot::Running(instance)) => Ok(StartPlan::Running(instance.clone())),
            Some(slot) => Ok(StartPlan::Busy(slot.label())),
            None => {
                record
                    .instances
                    .insert(instance_id.to_string(), InstanceSlot::Starting);
                Ok(StartPlan::Build(record.factory.clone()))
            }
        }
    }

    pub(crate) fn finish_start(&mut self, id: &str, instance_id: &str, instance: Arc<dyn Module>) {
        if let Some(record) = self.records.get_mut(id) {
            record
                .instances
                .insert(instance_id.to_string(), InstanceSlot::Running(instance));
        }
    }

    pub(crate) fn abort_start(&mut self, id: &str, instance_id: &str) {
        if let Some(record) = self.records.get_mut(id) {
            if matches!(record.instances.get(instance_id), Some(InstanceSlot::Starting)) {
                record.instances.remove(instance_id);
            }
        }
    }

    pub(crate) fn begin_stop(&mut self, id: &str, instance_id: &str) -> StopPlan {
        let Some(record) = self.records.get_mut(id) else {
            return StopPlan::UnknownModule;
        };
        let Some(slot) = record.instances.get_mut(instance_id) else {
            return StopPlan::NotRunning;
        };
        let instance = match slot {
            InstanceSlot::Running(instance) => instance.clone(),
            other => return StopPlan::Busy(other.label()),
        };
        *slot = InstanceSlot::Stopping(instance.clone());
        StopPlan::Destroy(instance)
    }

    pub(crate) fn finish_stop(&mut self, id: &str, instance_id: &str) {
        if let Some(record) = self.records.get_mut(id) {
            record.instances.remove(instance_id);
        }
    }

    /// Put a stopping instance back to running after a failed destroy.
    pub(crate) fn abort_stop(&mut self, id: &str, instance_id: &str) {
        let Some(slot) = self
            .records
            .get_mut(id)
            .and_then(|r| r.instances.get_mut(instance_id))
        else {
            return;
        };
        if let InstanceSlot::Stopping(instance) = slot {
            *slot = InstanceSlot::Running(instance.clone());
        }
    }

    pub(crate) fn modules(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Running instance ids per module, sorted; modules with none are omitted.
    pub(crate) fn running(&self) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        for (id, record) in &self.records {
            let mut ids: Vec<String> = record
                .instances
                .iter()
                .filter(|(_, slot)| matches!(slot, InstanceSlot::Running(_)))
                .map(|(instance_id, _)| instance_id.clone())
                .collect();
            if ids.is_empty() {
                continue;
            }
            ids.sort();
            out.insert(id.clone(), ids);
        }
        out
    }

    /// Running `(module, instance)` pairs, newest registration first.
    pub(crate) fn running_pairs_rev(&self) -> Vec<(String, String)> {
        let running = self.running();
        self.order
            .iter()
            .rev()
            .filter_map(|id| running.get(id).map(|ids| (id, ids)))
            .flat_map(|(id, ids)| ids.iter().map(move |i| (id.clone(), i.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::WeakCore;
    use crate::sandbox::Sandbox;

    struct Stub(Sandbox);

    impl Module for Stub {
        fn init(&self, _props: Option<&crate::Props>) -> anyhow::Result<()> {
            Ok(())
        }
        fn destroy(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn sandbox(&self) -> &Sandbox {
            &self.0
        }
    }

    fn stub() -> Arc<dyn Module> {
        Arc::new(Stub(Sandbox::new(WeakCore::default(), "m", "m")))
    }

    fn factory() -> ModuleFactory {
        Arc::new(|sandbox: Sandbox| -> anyhow::Result<Arc<dyn Module>> {
            Ok(Arc::new(Stub(sandbox)))
        })
    }

    #[test]
    fn register_rejects_empty_and_duplicate_ids() {
        let mut table = ModuleTable::default();
        table.register("a", factory()).unwrap();
        table.register("b", factory()).unwrap();
        assert!(matches!(
            table.register("a", factory()),
            Err(CoreError::DuplicateModule(id)) if id == "a"
        ));
        assert!(matches!(
            table.register(" ", factory()),
            Err(CoreError::InvalidModuleId)
        ));
        assert_eq!(table.modules(), vec!["a", "b"]);
    }

    #[test]
    fn start_reserves_slot_until_committed() {
        let mut table = ModuleTable::default();
        table.register("m", factory()).unwrap();

        assert!(matches!(table.begin_start("m", "m"), Ok(StartPlan::Build(_))));
        assert!(matches!(
            table.begin_start("m", "m"),
            Ok(StartPlan::Busy("starting"))
        ));
        assert!(table.running().is_empty(), "starting slots are not running");

        table.finish_start("m", "m", stub());
        assert!(matches!(table.begin_start("m", "m"), Ok(StartPlan::Running(_))));
        assert_eq!(table.running()["m"], vec!["m"]);
    }

    #[test]
    fn aborted_start_frees_the_slot() {
        let mut table = ModuleTable::default();
        table.register("m", factory()).unwrap();
        assert!(matches!(table.begin_start("m", "x"), Ok(StartPlan::Build(_))));
        table.abort_start("m", "x");
        assert!(matches!(table.begin_start("m", "x"), Ok(StartPlan::Build(_))));
    }

    #[test]
    fn unknown_module_cannot_start() {
        let mut table = ModuleTable::default();
        assert!(matches!(
            table.begin_start("ghost", "ghost"),
            Err(CoreError::UnknownModule(id)) if id == "ghost"
        ));
    }

    #[test]
    fn stop_transitions() {
        let mut table = ModuleTable::default();
        table.register("m", factory()).unwrap();
        assert!(matches!(table.begin_stop("nope", "nope"), StopPlan::UnknownModule));
        assert!(matches!(table.begin_stop("m", "m"), StopPlan::NotRunning));

        let _ = table.begin_start("m", "m").unwrap();
        table.finish_start("m", "m", stub());

        assert!(matches!(table.begin_stop("m", "m"), StopPlan::Destroy(_)));
        assert!(matches!(table.begin_stop("m", "m"), StopPlan::Busy("stopping")));

        // failed destroy puts it back
        table.abort_stop("m", "m");
        assert_eq!(table.running()["m"], vec!["m"]);

        assert!(matches!(table.begin_stop("m", "m"), StopPlan::Destroy(_)));
        table.finish_stop("m", "m");
        assert!(table.running().is_empty());
    }

    #[test]
    fn running_pairs_follow_reverse_registration_order() {
        let mut table = ModuleTable::default();
        table.register("first", factory()).unwrap();
        table.register("second", factory()).unwrap();
        for (id, instance) in [("first", "first"), ("second", "b"), ("second", "a")] {
            let _ = table.begin_start(id, instance).unwrap();
            table.finish_start(id, instance, stub());
        }

        assert_eq!(
            table.running_pairs_rev(),
            vec![
                ("second".to_string(), "a".to_string()),
                ("second".to_string(), "b".to_string()),
                ("first".to_string(), "first".to_string()),
            ]
        );
    }
}

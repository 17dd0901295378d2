use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use super::{Model, ModelKind};
use crate::{
    persistence::StateStore,
    sync::{Listeners, lock},
};

/// Serialization format version for stored models.
pub const MODEL_VERSION: u32 = 1;

pub trait ModelListener: Send + Sync {
    fn on_model_changed(&self, kind: ModelKind);
}

/// Persisted form of a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub version: u32,
    pub model: Model,
}

/// The fitted models currently in use, one per [`ModelKind`].
#[derive(Debug)]
pub struct ModelManager {
    store: StateStore,
    models: Mutex<HashMap<ModelKind, Model>>,
    listeners: Listeners<dyn ModelListener>,
}

impl ModelManager {
    /// Load whatever models a previous session stored.
    pub fn new(store: StateStore) -> Self {
        let mut models = HashMap::new();
        for kind in ModelKind::ALL {
            match store.load::<ModelRecord>(&record_name(kind)) {
                Ok(record) if record.version == MODEL_VERSION => {
                    log::info!("loaded {kind} model: {}", record.model);
                    models.insert(kind, record.model);
                }
                Ok(record) => log::warn!(
                    "discarding {kind} model with version {} (expected {MODEL_VERSION})",
                    record.version
                ),
                Err(e) => log::debug!("no stored {kind} model: {e}"),
            }
        }

        Self {
            store,
            models: Mutex::new(models),
            listeners: Listeners::new(),
        }
    }

    pub fn get(&self, kind: ModelKind) -> Option<Model> {
        lock(&self.models).get(&kind).copied()
    }

    /// Replace the model for `kind` and persist it.
    pub fn set(&self, kind: ModelKind, model: Model) {
        lock(&self.models).insert(kind, model);
        log::info!("{kind} model set to {model}");

        let record = ModelRecord {
            version: MODEL_VERSION,
            model,
        };
        if let Err(e) = self.store.save(&record_name(kind), &record) {
            log::warn!("couldn't save {kind} model: {e}");
        }

        self.listeners.notify(|l| l.on_model_changed(kind));
    }

    /// Forget the model for `kind`. Returns whether one was set.
    pub fn remove(&self, kind: ModelKind) -> bool {
        let removed = lock(&self.models).remove(&kind).is_some();
        if let Err(e) = self.store.remove(&record_name(kind)) {
            log::warn!("couldn't remove stored {kind} model: {e}");
        }

        if removed {
            self.listeners.notify(|l| l.on_model_changed(kind));
        }
        removed
    }

    pub fn add_listener(&self, listener: Arc<dyn ModelListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ModelListener>) -> bool {
        self.listeners.remove(listener)
    }
}

fn record_name(kind: ModelKind) -> String {
    format!("model_{kind}")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::model::{LinearModel, QuadraticModel};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ModelKind>>);

    impl ModelListener for Recorder {
        fn on_model_changed(&self, kind: ModelKind) {
            lock(&self.0).push(kind);
        }
    }

    #[test]
    fn test_models_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let screen = Model::Linear(LinearModel {
            slope: 1.7,
            intercept: 412.25,
        });
        let cpu = Model::Quadratic(QuadraticModel {
            a: 1e-4,
            b: 0.3,
            c: -2.0,
        });

        let manager = ModelManager::new(StateStore::new(dir.path()));
        manager.set(ModelKind::Screen, screen);
        manager.set(ModelKind::CpuFrequency, cpu);

        let reloaded = ModelManager::new(StateStore::new(dir.path()));
        assert_eq!(reloaded.get(ModelKind::Screen), Some(screen));
        assert_eq!(reloaded.get(ModelKind::CpuFrequency), Some(cpu));
        assert_eq!(reloaded.get(ModelKind::CpuLoad), None);
    }

    #[test]
    fn test_listeners_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(StateStore::new(dir.path()));
        let recorder = Arc::new(Recorder::default());
        manager.add_listener(recorder.clone());

        let model = Model::Linear(LinearModel {
            slope: 2.0,
            intercept: 0.0,
        });
        manager.set(ModelKind::CpuLoad, model);
        assert!(manager.remove(ModelKind::CpuLoad));
        assert!(!manager.remove(ModelKind::CpuLoad));

        assert_eq!(*lock(&recorder.0), vec![ModelKind::CpuLoad, ModelKind::CpuLoad]);
        let reloaded = ModelManager::new(StateStore::new(dir.path()));
        assert_eq!(reloaded.get(ModelKind::CpuLoad), None);
    }

    #[test]
    fn test_bad_records_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        fs::write(store.path("model_screen"), r#"{"version":1,"model":{"type":"cubic"}}"#)
            .unwrap();
        fs::write(
            store.path("model_cpu_load"),
            r#"{"version":99,"model":{"type":"linear_at_origin","slope":1.0}}"#,
        )
        .unwrap();

        let manager = ModelManager::new(store);
        assert_eq!(manager.get(ModelKind::Screen), None);
        assert_eq!(manager.get(ModelKind::CpuLoad), None);
    }
}

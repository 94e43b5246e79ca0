//! Process assembly: resolved [`Config`] in, wired services out.
//!
//! [`App::build`] opens the memory store, creates the task board, registers
//! the supervisor's own routes and loads the enabled modules.  Nothing runs
//! until [`App::start`] spawns the supervisor loop and the scheduler.

use std::fs;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::memory::{LexicalEmbedder, MemoryStore};
use crate::modules::{LoadReport, ModuleCatalog, ModuleLoader, Services};
use crate::priority::{PriorityEngine, TaskBoard};
use crate::runtime::{Component, ServiceHandle, spawn_components};
use crate::scheduler::{Scheduler, SchedulerService, state};
use crate::supervisor::bus::{BusHandle, SupervisorBus};
use crate::supervisor::router::EventRouter;
use crate::supervisor::{self, SupervisorService};

pub struct App {
    pub config: Config,
    pub router: Arc<EventRouter>,
    pub loader: ModuleLoader,
    pub memory: Arc<MemoryStore>,
    pub tasks: Arc<TaskBoard>,
    /// Outcome of the startup load pass.
    pub report: LoadReport,
    bus_handle: BusHandle,
    pending: Option<(SupervisorBus, Scheduler)>,
}

impl App {
    pub fn build(config: Config) -> Result<Self, AppError> {
        Self::build_with_catalog(config, ModuleCatalog::builtin())
    }

    pub fn build_with_catalog(config: Config, catalog: ModuleCatalog) -> Result<Self, AppError> {
        if config.memory.persist || config.scheduler.persist_state {
            fs::create_dir_all(&config.work_dir)?;
        }

        let embedder = Arc::new(LexicalEmbedder::new(config.memory.dimensions)?);
        let memory = if config.memory.persist {
            MemoryStore::open(&config.work_dir, embedder, config.memory.metric)?
        } else {
            MemoryStore::in_memory(embedder, config.memory.metric)
        };
        let memory = Arc::new(memory);

        let priority =
            PriorityEngine::new(config.priority).map_err(|e| AppError::Config(e.to_string()))?;
        let tasks = Arc::new(TaskBoard::new(priority));

        let router = Arc::new(EventRouter::new());
        supervisor::register_builtin_routes(&router);

        let services = Services {
            memory: memory.clone(),
            tasks: tasks.clone(),
            priority,
        };
        let loader = ModuleLoader::new(router.clone(), catalog, services);
        let report = loader.load_modules(&config.modules);
        for failure in &report.failed {
            warn!(module = %failure.module(), "module disabled: {failure}");
        }

        let bus = SupervisorBus::new(config.bus_buffer);
        let bus_handle = bus.handle.clone();

        let mut scheduler = Scheduler::new(config.scheduler.events.clone(), config.scheduler.utc_offset)
            .with_tick(config.scheduler.tick);
        if config.scheduler.persist_state {
            scheduler = scheduler.with_state_file(state::state_path(&config.work_dir))?;
        }

        Ok(Self {
            config,
            router,
            loader,
            memory,
            tasks,
            report,
            bus_handle,
            pending: Some((bus, scheduler)),
        })
    }

    /// Handle for adapters and tests to talk to the supervisor.
    pub fn bus(&self) -> BusHandle {
        self.bus_handle.clone()
    }

    /// Spawn the supervisor loop and the scheduler.  Both stop when
    /// `shutdown` is cancelled.
    pub fn start(&mut self, shutdown: CancellationToken) -> Result<ServiceHandle, AppError> {
        let (bus, scheduler) = self
            .pending
            .take()
            .ok_or_else(|| AppError::Runtime("app already started".into()))?;

        let modules: Vec<String> = self.router.modules().into_iter().map(|m| m.name).collect();
        info!(
            name = %self.config.name,
            modules = ?modules,
            events = scheduler.events().len(),
            "starting services"
        );

        let components: Vec<Box<dyn Component>> = vec![
            Box::new(SupervisorService::new(bus, self.router.clone())),
            Box::new(SchedulerService::new(scheduler, self.bus_handle.clone())),
        ];
        Ok(spawn_components(components, shutdown))
    }
}

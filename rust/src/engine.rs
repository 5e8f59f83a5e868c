//! Engine facade over the analysis, buffer, and forecast modules.
//!
//! The engine owns no state of its own beyond configuration: project data and
//! buffers come from the injected store, time from the injected clock.

use crate::buffer::{evaluate_project, plan_buffers, ProjectBufferHealth};
use crate::config::{AnalysisConfig, BufferConfig, ForecastConfig};
use crate::critical_chain::{analyze_graph, prepare_graph, CriticalChainResult, PreparedGraph};
use crate::error::CcpmError;
use crate::forecast::run_forecast;
use crate::graph::TaskGraph;
use crate::models::{Buffer, ForecastResult, Task};
use crate::store::{BufferFilter, BufferStore, BufferUpdate, Clock, ProjectSource, SystemClock};
use crate::{log_changes, log_checks};

/// Critical chain engine bound to a store and a clock.
pub struct CcpmEngine<S, C = SystemClock> {
    store: S,
    clock: C,
    analysis: AnalysisConfig,
    buffers: BufferConfig,
}

impl<S: ProjectSource + BufferStore> CcpmEngine<S, SystemClock> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S, C> CcpmEngine<S, C>
where
    S: ProjectSource + BufferStore,
    C: Clock,
{
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            analysis: AnalysisConfig::default(),
            buffers: BufferConfig::default(),
        }
    }

    pub fn with_analysis_config(mut self, config: AnalysisConfig) -> Self {
        self.analysis = config;
        self
    }

    pub fn with_buffer_config(mut self, config: BufferConfig) -> Self {
        self.buffers = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn load_tasks(&self, project_id: &str) -> Result<Vec<Task>, CcpmError> {
        if !self.store.project_exists(project_id)? {
            return Err(CcpmError::ProjectNotFound(project_id.to_string()));
        }
        self.store.get_task_graph(project_id)
    }

    fn load_graph(&self, project_id: &str) -> Result<PreparedGraph, CcpmError> {
        let tasks = self.load_tasks(project_id)?;
        let dependencies = self.store.get_dependencies(project_id)?;
        let graph = TaskGraph::build(&tasks, &dependencies)?;
        prepare_graph(graph, &self.analysis)
    }

    /// Critical chain and feeding chains of a project.
    pub fn critical_chain(&self, project_id: &str) -> Result<CriticalChainResult, CcpmError> {
        let prepared = self.load_graph(project_id)?;
        Ok(analyze_graph(&prepared, &self.analysis))
    }

    /// Monte Carlo completion forecast.
    ///
    /// The request is validated before any project data is read. Minute
    /// offsets are anchored at `start_epoch_ms`, or at the clock's now.
    pub fn forecast(
        &self,
        project_id: &str,
        config: &ForecastConfig,
        start_epoch_ms: Option<i64>,
    ) -> Result<ForecastResult, CcpmError> {
        config.validate()?;
        let prepared = self.load_graph(project_id)?;
        let now = self.clock.now_ms();
        run_forecast(
            &prepared.graph,
            config,
            start_epoch_ms.unwrap_or(now),
            now,
            self.analysis.verbosity,
        )
    }

    /// Recompute the project's buffers and swap them in atomically.
    ///
    /// Returns the new active set. On a store failure the prior set stays active.
    pub fn regenerate_buffers(&self, project_id: &str) -> Result<Vec<Buffer>, CcpmError> {
        let prepared = self.load_graph(project_id)?;
        let chains = analyze_graph(&prepared, &self.analysis);
        let now = self.clock.now_ms();
        let buffers = plan_buffers(
            project_id,
            &prepared.graph,
            &chains,
            &self.buffers,
            now,
            self.analysis.verbosity,
        );

        self.store
            .replace_active_buffers(project_id, buffers.clone(), now)?;

        log_changes!(
            self.analysis.verbosity,
            "regenerated {} buffer(s) for project {}",
            buffers.len(),
            project_id
        );
        for buffer in &buffers {
            log_checks!(
                self.analysis.verbosity,
                "{} ({}): {:.1} min",
                buffer.name,
                buffer.id,
                buffer.planned_minutes
            );
        }
        Ok(buffers)
    }

    /// Fever chart status of the project's active buffers.
    pub fn buffer_status(&self, project_id: &str) -> Result<ProjectBufferHealth, CcpmError> {
        let tasks = self.load_tasks(project_id)?;
        let buffers = self.store.load_active_buffers(project_id)?;
        Ok(evaluate_project(&buffers, &tasks, &self.buffers))
    }

    pub fn list_buffers(&self, filter: &BufferFilter) -> Result<Vec<Buffer>, CcpmError> {
        self.store.list_buffers(filter)
    }

    pub fn get_buffer(&self, buffer_id: &str) -> Result<Buffer, CcpmError> {
        self.store
            .get_buffer(buffer_id)?
            .ok_or_else(|| CcpmError::BufferNotFound(buffer_id.to_string()))
    }

    /// Rename, archive, or raise consumption. Lowering consumption goes
    /// through `reset_buffer_consumption`.
    pub fn update_buffer(&self, buffer_id: &str, update: &BufferUpdate) -> Result<Buffer, CcpmError> {
        self.store
            .update_buffer(buffer_id, update, self.clock.now_ms())
    }

    /// Record `delta_minutes` more buffer consumption.
    pub fn consume_buffer(&self, buffer_id: &str, delta_minutes: f64) -> Result<Buffer, CcpmError> {
        let buffer = self
            .store
            .increment_consumed(buffer_id, delta_minutes, self.clock.now_ms())?;
        log_checks!(
            self.analysis.verbosity,
            "buffer {} consumed {:.1}/{:.1} min",
            buffer.id,
            buffer.consumed_minutes,
            buffer.planned_minutes
        );
        Ok(buffer)
    }

    pub fn reset_buffer_consumption(&self, buffer_id: &str, minutes: f64) -> Result<Buffer, CcpmError> {
        self.store
            .reset_consumed(buffer_id, minutes, self.clock.now_ms())
    }

    pub fn delete_buffer(&self, buffer_id: &str) -> Result<(), CcpmError> {
        if self.store.delete_buffer(buffer_id)? {
            Ok(())
        } else {
            Err(CcpmError::BufferNotFound(buffer_id.to_string()))
        }
    }
}

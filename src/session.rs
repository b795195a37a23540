//! Monitor Session
//!
//! One session per open dashboard. It owns the link manager, the reading,
//! the goal and both background loops, and releases all of them when closed
//! or dropped.

use crate::config::MonitorConfig;
use crate::link::{LinkConfig, LinkError, LinkManager, SharedLink};
use crate::monitor::{
    run_polling_loop, run_simulation_loop, DashboardSnapshot, Goal, MonitorEvent, ReadingStore,
    StopReason,
};
use crate::transport::{BluetoothBackend, DeviceDescriptor};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct MonitorSession<B: BluetoothBackend + 'static> {
    link: SharedLink<B>,
    reading: ReadingStore,
    goal: Goal,
    poll_interval: Duration,
    simulation_step: f32,
    /// "Connection requested" switch observed by the polling loop
    requested_tx: watch::Sender<bool>,
    simulate_tx: watch::Sender<bool>,
    poll_task: Option<JoinHandle<StopReason>>,
    sim_task: Option<JoinHandle<()>>,
    event_tx: mpsc::UnboundedSender<MonitorEvent>,
    event_rx: mpsc::UnboundedReceiver<MonitorEvent>,
}

impl<B: BluetoothBackend + 'static> MonitorSession<B> {
    pub fn new(backend: B, link_config: LinkConfig, monitor: &MonitorConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (requested_tx, _) = watch::channel(false);
        let (simulate_tx, _) = watch::channel(false);

        Self {
            link: Arc::new(Mutex::new(LinkManager::new(backend, link_config))),
            reading: ReadingStore::new(monitor.initial_reading),
            goal: Goal::new(monitor.goal_amps).unwrap_or_default(),
            poll_interval: monitor.poll_interval(),
            simulation_step: monitor.simulation_step,
            requested_tx,
            simulate_tx,
            poll_task: None,
            sim_task: None,
            event_tx,
            event_rx,
        }
    }

    /// Receive the next monitor event
    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.event_rx.recv().await
    }

    pub fn link(&self) -> SharedLink<B> {
        self.link.clone()
    }

    pub fn reading(&self) -> ReadingStore {
        self.reading.clone()
    }

    pub fn goal(&self) -> Goal {
        self.goal
    }

    /// Replace the goal; non-positive values are ignored
    pub fn set_goal(&mut self, amps: f32) -> bool {
        match Goal::new(amps) {
            Some(goal) => {
                info!("[SESSION] Goal set to {:.2} A", amps);
                self.goal = goal;
                true
            }
            None => {
                warn!("[SESSION] Ignoring goal {}", amps);
                false
            }
        }
    }

    pub fn connection_requested(&self) -> bool {
        *self.requested_tx.borrow()
    }

    pub fn is_polling(&self) -> bool {
        self.poll_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn is_simulating(&self) -> bool {
        self.sim_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Connect when idle, disconnect when a connection is requested
    ///
    /// Returns whether a connection is requested afterwards.
    pub async fn toggle_connection(&mut self, address: &str) -> Result<bool, LinkError> {
        if self.connection_requested() {
            self.stop_link().await;
            Ok(false)
        } else {
            self.start_link(address).await?;
            Ok(true)
        }
    }

    /// Connect to `address` and start polling it
    pub async fn start_link(&mut self, address: &str) -> Result<(), LinkError> {
        self.requested_tx.send_replace(false);
        self.finish_polling().await;

        {
            let mut link = self.link.lock().await;
            if !link.is_transport_available().await {
                return Err(LinkError::TransportUnavailable);
            }
            link.connect(address).await?;
        }

        self.requested_tx.send_replace(true);
        self.poll_task = Some(tokio::spawn(run_polling_loop(
            self.link.clone(),
            self.reading.clone(),
            self.requested_tx.subscribe(),
            self.poll_interval,
            self.event_tx.clone(),
        )));
        info!("[SESSION] Link to {} requested", address);
        Ok(())
    }

    /// Withdraw the connection request, wait for polling to end, disconnect
    ///
    /// A poll blocked on a silent remote keeps this waiting until its read
    /// returns.
    pub async fn stop_link(&mut self) {
        self.requested_tx.send_replace(false);
        self.finish_polling().await;
        self.link.lock().await.disconnect().await;
    }

    async fn finish_polling(&mut self) {
        if let Some(task) = self.poll_task.take() {
            match task.await {
                Ok(reason) => info!("[SESSION] Polling finished: {}", reason),
                Err(e) => warn!("[SESSION] Polling task failed: {}", e),
            }
        }
    }

    /// Start or stop the simulated load
    pub async fn set_simulation(&mut self, enabled: bool) {
        if enabled {
            if self.is_simulating() {
                return;
            }
            self.simulate_tx.send_replace(true);
            self.sim_task = Some(tokio::spawn(run_simulation_loop(
                self.reading.clone(),
                self.simulate_tx.subscribe(),
                self.simulation_step,
                self.poll_interval,
                self.event_tx.clone(),
            )));
        } else {
            self.simulate_tx.send_replace(false);
            if let Some(task) = self.sim_task.take() {
                if let Err(e) = task.await {
                    warn!("[SESSION] Simulation task failed: {}", e);
                }
            }
        }
    }

    /// Flip the simulated load; returns whether it is now running
    pub async fn toggle_simulation(&mut self) -> bool {
        let enable = !self.is_simulating();
        self.set_simulation(enable).await;
        enable
    }

    /// Send a text command to the meter
    pub async fn write(&self, data: &str) -> Result<(), LinkError> {
        self.link.lock().await.write(data).await
    }

    pub async fn paired_devices(&self) -> HashSet<DeviceDescriptor> {
        self.link.lock().await.list_paired_devices().await
    }

    pub async fn snapshot(&self) -> DashboardSnapshot {
        let reading = self.reading.get().await;
        DashboardSnapshot {
            reading,
            goal: self.goal.amps(),
            ratio: self.goal.ratio(reading),
            // The requested switch, not liveness
            connected: self.connection_requested(),
            simulating: self.is_simulating(),
        }
    }

    /// Stop both loops and drop the connection
    pub async fn close(mut self) {
        self.set_simulation(false).await;
        self.stop_link().await;
        info!("[SESSION] Closed");
    }
}

impl<B: BluetoothBackend + 'static> Drop for MonitorSession<B> {
    fn drop(&mut self) {
        // Aborting releases the link lock; the stream closes with the manager
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        if let Some(task) = self.sim_task.take() {
            task.abort();
        }
    }
}

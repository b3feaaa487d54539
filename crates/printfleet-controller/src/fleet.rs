use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hashbrown::{DefaultHashBuilder, HashMap, HashSet};

use indexmap::IndexMap;
use indexmap::map::Entry;

use printfleet::TelemetrySnapshot;

use tokio::task::JoinSet;

use tracing::{debug, info};

use crate::config::PrinterConfig;
use crate::device::DeviceHandle;
use crate::error::{Error, ErrorKind, FleetError, Result};

type Registry = IndexMap<String, Arc<DeviceHandle>, DefaultHashBuilder>;

fn fleet_error(id: &str, error: &tokio::task::JoinError) -> Error {
    let reason = if error.is_panic() {
        "panicked"
    } else {
        "was cancelled"
    };
    Error::new(ErrorKind::Fleet, format!("The operation on `{id}` {reason}"))
}

/// A set of devices addressed by their serial numbers.
///
/// Devices keep their insertion order, which is the order used by
/// index-based operations.
#[derive(Debug, Default)]
pub struct Fleet {
    devices: RwLock<Registry>,
}

impl Fleet {
    /// Creates an empty [`Fleet`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a device from its configuration and adds it to the fleet.
    ///
    /// # Errors
    ///
    /// - A device with the same serial number is already registered
    /// - The device cannot be created
    pub fn add_device(&self, config: PrinterConfig) -> Result<Arc<DeviceHandle>> {
        let handle = Arc::new(DeviceHandle::new(config)?);
        self.add_handle(Arc::clone(&handle))?;
        Ok(handle)
    }

    /// Adds an existing device to the fleet.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Fleet`] error if a device with the same serial
    /// number is already registered.
    pub fn add_handle(&self, handle: Arc<DeviceHandle>) -> Result<()> {
        match self.write().entry(handle.id().to_owned()) {
            Entry::Occupied(entry) => Err(Error::new(
                ErrorKind::Fleet,
                format!("A device with id `{}` is already registered", entry.key()),
            )),
            Entry::Vacant(entry) => {
                debug!(serial = entry.key().as_str(), "Device added");
                entry.insert(handle);
                Ok(())
            }
        }
    }

    /// Removes a device from the fleet and returns it.
    ///
    /// The device is not disconnected.
    pub fn remove_device(&self, id: &str) -> Option<Arc<DeviceHandle>> {
        self.write().shift_remove(id)
    }

    /// Returns the device with the given serial number.
    #[must_use]
    pub fn device(&self, id: &str) -> Option<Arc<DeviceHandle>> {
        self.read().get(id).cloned()
    }

    /// Returns all devices in insertion order.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<DeviceHandle>> {
        self.read().values().cloned().collect()
    }

    /// Returns all serial numbers in insertion order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Returns the number of devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the fleet has no devices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Runs an operation on every device at once.
    ///
    /// Each device gets its own task, so a failing or panicking operation
    /// never stops the others.
    ///
    /// # Errors
    ///
    /// Returns every failure tagged with the serial number of its device,
    /// in insertion order.
    pub async fn exec_concurrent<F, Fut>(&self, op: F) -> std::result::Result<(), FleetError>
    where
        F: Fn(Arc<DeviceHandle>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let targets = self.read().values().cloned().enumerate().collect();
        run_concurrent(targets, op, FleetError::default()).await
    }

    /// Runs an operation at once on the devices at the given insertion
    /// indices.
    ///
    /// Repeated indices run the operation once.
    ///
    /// # Errors
    ///
    /// Returns every failure tagged with the serial number of its device,
    /// together with the indices matching no device.
    pub async fn exec_concurrent_subset<F, Fut>(
        &self,
        op: F,
        indices: &[usize],
    ) -> std::result::Result<(), FleetError>
    where
        F: Fn(Arc<DeviceHandle>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut errors = FleetError::default();
        let mut targets = Vec::with_capacity(indices.len());
        let mut seen = HashSet::with_capacity(indices.len());

        {
            let devices = self.read();
            for &index in indices {
                if !seen.insert(index) {
                    continue;
                }
                match devices.get_index(index) {
                    Some((_, device)) => targets.push((index, Arc::clone(device))),
                    None => errors.push_missing(index),
                }
            }
        }

        run_concurrent(targets, op, errors).await
    }

    /// Runs an operation on one device at a time, in serial number order.
    ///
    /// # Errors
    ///
    /// Returns the first failure as is. The remaining devices are skipped.
    pub async fn exec_sequential<F, Fut>(&self, op: F) -> Result<()>
    where
        F: Fn(Arc<DeviceHandle>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut devices: Vec<_> = self
            .read()
            .iter()
            .map(|(id, device)| (id.clone(), Arc::clone(device)))
            .collect();
        devices.sort_by(|(a, _), (b, _)| a.cmp(b));

        run_sequential(devices.into_iter().map(|(_, device)| device), op).await
    }

    /// Runs an operation on one device at a time, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns the first failure as is. The remaining devices are skipped.
    pub async fn exec_sequential_ordered<F, Fut>(&self, op: F) -> Result<()>
    where
        F: Fn(Arc<DeviceHandle>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let devices = self.devices();
        run_sequential(devices.into_iter(), op).await
    }

    /// Connects every device.
    ///
    /// # Errors
    ///
    /// Returns the devices which could not be connected.
    pub async fn connect_all(&self) -> std::result::Result<(), FleetError> {
        let outcome = self
            .exec_concurrent(|device| async move { device.connect().await })
            .await;
        info!(devices = self.len(), "Fleet connected");
        outcome
    }

    /// Disconnects every device.
    pub async fn disconnect_all(&self) {
        // Disconnection does not fail, only a panic could be reported.
        if let Err(e) = self
            .exec_concurrent(|device| async move {
                device.disconnect().await;
                Ok(())
            })
            .await
        {
            debug!("Fleet disconnection: {e}");
        }
    }

    /// Returns the telemetry of every device, by serial number and in
    /// insertion order.
    ///
    /// Stale devices are asked for a refresh in the background.
    #[must_use]
    pub fn snapshots(&self) -> IndexMap<String, TelemetrySnapshot, DefaultHashBuilder> {
        self.read()
            .iter()
            .map(|(id, device)| (id.clone(), device.telemetry()))
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_concurrent<F, Fut>(
    targets: Vec<(usize, Arc<DeviceHandle>)>,
    op: F,
    mut errors: FleetError,
) -> std::result::Result<(), FleetError>
where
    F: Fn(Arc<DeviceHandle>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let op = Arc::new(op);
    let mut tasks = JoinSet::new();
    let mut owners = HashMap::with_capacity(targets.len());

    // The operation is built inside the task, so its panics stay there too.
    for (index, device) in targets {
        let id = device.id().to_owned();
        let op = Arc::clone(&op);
        let task = tasks.spawn(async move { op(device).await });
        owners.insert(task.id(), (index, id));
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next_with_id().await {
        let (task, error) = match joined {
            Ok((_, Ok(()))) => continue,
            Ok((task, Err(e))) => (task, e),
            Err(e) => {
                let id = owners.get(&e.id()).map_or("unknown", |(_, id)| id.as_str());
                (e.id(), fleet_error(id, &e))
            }
        };

        if let Some((index, id)) = owners.remove(&task) {
            failures.push((index, id, error));
        }
    }

    failures.sort_by_key(|(index, _, _)| *index);
    for (_, id, error) in failures {
        errors.push(id, error);
    }

    errors.into_result()
}

async fn run_sequential<F, Fut>(
    devices: impl Iterator<Item = Arc<DeviceHandle>>,
    op: F,
) -> Result<()>
where
    F: Fn(Arc<DeviceHandle>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let op = Arc::new(op);
    for device in devices {
        let id = device.id().to_owned();
        let op = Arc::clone(&op);
        match tokio::spawn(async move { op(device).await }).await {
            Ok(outcome) => outcome?,
            Err(e) => return Err(fleet_error(&id, &e)),
        }
    }
    Ok(())
}

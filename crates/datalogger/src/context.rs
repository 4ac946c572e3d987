//! Process-wide data logger context
//!
//! Built once at startup and passed to every consumer; there are no global
//! instances.

use crate::config::{ConfigStore, LoggerConfig};
use crate::connection_manager::{ConnectionManager, IwgetidNetworkInfo, NetworkInfo};
use crate::engine::Engine;
use crate::orchestrator::DataLogger;
use crate::signal::SignalBus;
use obd_metrics::{Diagnostics, MetricsCollector, PidId, PidRegistry};
use obd_query::Query;
use obd_transport::{BluetoothRadio, RfcommTtyRadio, SerialPortProber, TokioSerialProber};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Shared handles of one data logger instance
pub struct DataLoggerContext {
    pub config: ConfigStore,
    pub signals: Arc<SignalBus>,
    pub collector: Arc<MetricsCollector>,
    pub query: Arc<Query>,
    pub logger: DataLogger,
}

impl DataLoggerContext {
    /// Start building a context around `engine` and its diagnostics suppliers
    pub fn builder(
        config: LoggerConfig,
        engine: Arc<dyn Engine>,
        registry: Arc<dyn PidRegistry>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> ContextBuilder {
        ContextBuilder {
            config,
            engine,
            registry,
            diagnostics,
            radio: None,
            network: None,
            serial: None,
        }
    }

    /// Publish a new configuration and refresh the query settings
    pub fn reload(&self, config: LoggerConfig) {
        info!("Reloading data logger configuration");
        self.query.reload(config.query.clone());
        self.config.publish(config);
    }

    /// Switch to the selection persisted for `screen`, filter the collector
    /// to it and push the resulting query to a running engine
    pub async fn apply_screen(&self, screen: &str) -> BTreeSet<PidId> {
        let ids = self.query.apply(screen);
        let order = self
            .query
            .screen_filter(screen)
            .and_then(|filter| filter.order_map());
        self.collector.apply_filter(&ids, order.as_ref());
        self.logger.update_query().await;
        ids
    }

    /// Same as [`DataLoggerContext::apply_screen`] for an explicit id set
    pub async fn apply_ids(&self, ids: &BTreeSet<PidId>) -> BTreeSet<PidId> {
        let ids = self.query.apply_ids(ids);
        self.collector.apply_filter(&ids, None);
        self.logger.update_query().await;
        ids
    }
}

/// Builder for [`DataLoggerContext`]; platform seams default to the host's
pub struct ContextBuilder {
    config: LoggerConfig,
    engine: Arc<dyn Engine>,
    registry: Arc<dyn PidRegistry>,
    diagnostics: Arc<dyn Diagnostics>,
    radio: Option<Arc<dyn BluetoothRadio>>,
    network: Option<Arc<dyn NetworkInfo>>,
    serial: Option<Arc<dyn SerialPortProber>>,
}

impl ContextBuilder {
    pub fn radio(mut self, radio: Arc<dyn BluetoothRadio>) -> Self {
        self.radio = Some(radio);
        self
    }

    pub fn network(mut self, network: Arc<dyn NetworkInfo>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn serial(mut self, serial: Arc<dyn SerialPortProber>) -> Self {
        self.serial = Some(serial);
        self
    }

    /// Assemble the context. Must be called inside a Tokio runtime.
    pub fn build(self) -> DataLoggerContext {
        let signals = Arc::new(SignalBus::new());
        let radio = self.radio.unwrap_or_else(|| {
            Arc::new(RfcommTtyRadio::new(
                self.config.connection.rfcomm_bindings.clone(),
            ))
        });
        let network = self
            .network
            .unwrap_or_else(|| Arc::new(IwgetidNetworkInfo));
        let serial = self.serial.unwrap_or_else(|| Arc::new(TokioSerialProber));
        let connections = ConnectionManager::new(radio, network, serial, signals.clone());

        let collector = Arc::new(MetricsCollector::new(self.registry, self.diagnostics));
        let query = Arc::new(Query::new(self.config.query.clone()));
        let config = ConfigStore::new(self.config);
        let logger = DataLogger::new(
            self.engine,
            connections,
            collector.clone(),
            query.clone(),
            config.clone(),
            signals.clone(),
        );

        DataLoggerContext {
            config,
            signals,
            collector,
            query,
            logger,
        }
    }
}

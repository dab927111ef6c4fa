//! Model-service client
//!
//! Typed request/response over two connected Unix streams to the external
//! online-model service. The training stream carries u32 command words
//! (low 31 bits = measurement count, MSB = train/test intent) answered by
//! fixed-width replies; the prediction stream exchanges one feature record
//! for one prediction record. Framing is exact-size record-at-a-time:
//! `write_all`/`read_exact` absorb partial transfers, and a closed peer is
//! fatal to the run.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info};

use tessera_shared::protocol::records::{
    Features, Metrics, Prediction, END_OF_SESSION, METRICS_BYTES, NEW_WORKLOAD, PREDICTION_BYTES,
    TRAIN_FLAG,
};

/// Client over the training and prediction streams.
pub struct ModelClient {
    training: UnixStream,
    prediction: UnixStream,
}

impl ModelClient {
    /// Connect both streams and announce the ring depth on the training
    /// stream; the service acknowledges before the first operation so its
    /// ingest buffers are sized before any window lands in the ring.
    pub fn connect(
        training_path: &Path,
        prediction_path: &Path,
        measurements_per_training: u32,
    ) -> Result<Self> {
        let mut training = UnixStream::connect(training_path)
            .with_context(|| format!("connecting training stream {}", training_path.display()))?;

        training
            .write_u32::<LittleEndian>(measurements_per_training)
            .context("announcing ring depth")?;
        let ack = training
            .read_i32::<LittleEndian>()
            .context("waiting for ring-depth ack")?;
        debug!("model service acked ring depth: {ack}");

        let prediction = UnixStream::connect(prediction_path).with_context(|| {
            format!("connecting prediction stream {}", prediction_path.display())
        })?;

        info!("model service connected (ring depth {measurements_per_training})");
        Ok(Self {
            training,
            prediction,
        })
    }

    /// Hand a finished measurement phase to the service, which decides
    /// whether to train or test. The reply is the number of observations
    /// the hardware should idle for before the next phase (0 = none).
    pub fn operation(&mut self, num_measurements: u32) -> Result<i32> {
        self.training
            .write_u32::<LittleEndian>(num_measurements)
            .context("sending operation command")?;
        let obs_to_wait = self
            .training
            .read_i32::<LittleEndian>()
            .context("reading obs-to-wait reply")?;
        debug!("model operation: {num_measurements} measurements, obs_to_wait {obs_to_wait}");
        Ok(obs_to_wait)
    }

    /// Command a training pass over `num_measurements` windows.
    pub fn train(&mut self, num_measurements: u32) -> Result<Metrics> {
        self.command_with_metrics(num_measurements | TRAIN_FLAG)
            .context("train command")
    }

    /// Command a test pass over `num_measurements` windows.
    pub fn test(&mut self, num_measurements: u32) -> Result<Metrics> {
        self.command_with_metrics(num_measurements & !TRAIN_FLAG)
            .context("test command")
    }

    fn command_with_metrics(&mut self, command: u32) -> Result<Metrics> {
        self.training.write_u32::<LittleEndian>(command)?;
        let mut reply = [0u8; METRICS_BYTES];
        self.training.read_exact(&mut reply)?;
        let metrics = Metrics::decode(&reply)?;
        debug!(
            "model metrics: ps {:.6} pl {:.6} time {:.6}",
            metrics.ps_power_error, metrics.pl_power_error, metrics.time_error
        );
        Ok(metrics)
    }

    /// Request a prediction for one feature record.
    pub fn predict(&mut self, features: &Features) -> Result<Prediction> {
        self.prediction
            .write_all(&features.encode())
            .context("sending feature record")?;
        let mut reply = [0u8; PREDICTION_BYTES];
        self.prediction
            .read_exact(&mut reply)
            .context("reading prediction record")?;
        Prediction::decode(&reply)
    }

    /// Tell the service a new workload begins so it resets its ingest
    /// state. Sent between workloads, never before the first.
    pub fn notify_new_workload(&mut self) -> Result<()> {
        self.training
            .write_i32::<LittleEndian>(NEW_WORKLOAD)
            .context("sending new-workload marker")
    }

    /// End the session: the zero command on the training stream releases
    /// the service's training loop; one zero byte ends the prediction
    /// loop.
    pub fn end_session(&mut self) -> Result<()> {
        self.training
            .write_u32::<LittleEndian>(END_OF_SESSION)
            .context("sending end-of-session")?;
        self.prediction
            .write_all(&[b'0'])
            .context("ending prediction stream")?;
        info!("model service session ended");
        Ok(())
    }
}

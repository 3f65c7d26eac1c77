use kontur_core::codec;
use kontur_core::config::RuntimeConfig;
use kontur_core::{HandlerFault, Intent, OrganState, Packet, ProtocolError};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};

use crate::organ::{Organ, Reply};
use crate::transport::{Line, PacketReader, PacketWriter};

/// `COMMAND` op_code that ends the loop.
pub const SHUTDOWN_OP: &str = "SHUTDOWN";

/// Counters for one [`OrganRuntime::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Decoded packets, whatever happened to them afterwards.
    pub packets: u64,
    /// Successful organ handler invocations.
    pub handled: u64,
    pub faults: u64,
    pub decode_errors: u64,
    pub integrity_failures: u64,
    pub heartbeats: u64,
}

enum Flow {
    Continue,
    Stop,
}

// ============================================================================
// OrganRuntime
// ============================================================================

pub struct OrganRuntime<O: Organ> {
    organ: O,
    config: RuntimeConfig,
    state: OrganState,
    packet_count: u64,
    heartbeat_seq: u64,
}

impl<O: Organ> OrganRuntime<O> {
    pub fn new(organ: O, config: RuntimeConfig) -> Self {
        Self {
            organ,
            config,
            state: OrganState::Ready,
            packet_count: 0,
            heartbeat_seq: 0,
        }
    }

    pub fn state(&self) -> OrganState {
        self.state
    }

    pub fn organ(&self) -> &O {
        &self.organ
    }

    /// Run on the process's stdin/stdout.
    pub async fn run_stdio(&mut self) -> anyhow::Result<RunSummary> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.run(stdin, stdout).await
    }

    /// Drive the loop until end-of-input or a shutdown command.
    ///
    /// Only I/O failures on the streams themselves are returned as errors;
    /// everything packet-related is logged and answered in-band.
    pub async fn run<R, W>(&mut self, input: R, output: W) -> anyhow::Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if self.state == OrganState::Stopped {
            anyhow::bail!("organ {} already stopped", self.organ.urn());
        }

        let mut reader = PacketReader::new(input).with_max_line(self.config.max_line_bytes);
        let mut writer = PacketWriter::new(output);
        let mut summary = RunSummary::default();

        self.state = OrganState::Running;
        tracing::info!("Organ started: {}", self.organ.urn());

        let result = self.pump(&mut reader, &mut writer, &mut summary).await;

        self.state = OrganState::Stopped;
        tracing::info!(
            "Organ stopped: {} after {} packets ({} faults, {} malformed)",
            self.organ.urn(),
            summary.packets,
            summary.faults,
            summary.decode_errors
        );
        result.map(|_| summary)
    }

    async fn pump<R, W>(
        &mut self,
        reader: &mut PacketReader<R>,
        writer: &mut PacketWriter<W>,
        summary: &mut RunSummary,
    ) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while let Some(next) = reader.next_line().await? {
            let raw = match next {
                Line::Complete(raw) => raw,
                Line::Oversized => {
                    summary.decode_errors += 1;
                    tracing::warn!(
                        "Dropping input line longer than {} bytes",
                        self.config.max_line_bytes
                    );
                    continue;
                }
            };
            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(e) => {
                    summary.decode_errors += 1;
                    tracing::warn!("Dropping non UTF-8 input line: {}", e);
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let packet = match codec::decode(&line) {
                Ok(packet) => packet,
                Err(e) => {
                    summary.decode_errors += 1;
                    tracing::warn!("Dropping malformed input line: {}", e);
                    continue;
                }
            };

            self.packet_count += 1;
            summary.packets += 1;

            let flow = self.dispatch(&packet, writer, summary).await?;

            self.organ.after_packet(self.packet_count);

            if self.config.heartbeat_every > 0
                && self.packet_count % self.config.heartbeat_every == 0
            {
                self.emit_heartbeat(writer).await?;
                summary.heartbeats += 1;
            }

            if let Flow::Stop = flow {
                tracing::info!("Shutdown requested by {}", packet.route.from);
                break;
            }
        }
        Ok(())
    }

    async fn dispatch<W: AsyncWrite + Unpin>(
        &mut self,
        packet: &Packet,
        writer: &mut PacketWriter<W>,
        summary: &mut RunSummary,
    ) -> anyhow::Result<Flow> {
        if let Err(e) = self.check_integrity(packet) {
            summary.integrity_failures += 1;
            tracing::warn!("Packet {} from {} rejected: {}", packet.id, packet.route.from, e);
            let reply = self.error_payload(packet, e.kind(), &e.to_string());
            writer
                .send(self.envelope(packet, Intent::Error, "REJECTED", reply))
                .await?;
            return Ok(Flow::Continue);
        }

        match &packet.instruction.intent {
            Intent::Heartbeat => {
                let pong = json!({
                    "urn": self.organ.urn(),
                    "state": self.state,
                    "packets_processed": self.packet_count,
                });
                writer
                    .send(self.envelope(packet, Intent::Heartbeat, "PONG", pong))
                    .await?;
                return Ok(Flow::Continue);
            }
            Intent::Command if packet.instruction.is_op(SHUTDOWN_OP) => {
                let ack = json!({
                    "urn": self.organ.urn(),
                    "stopping": true,
                    "packets_processed": self.packet_count,
                });
                writer
                    .send(self.envelope(packet, Intent::Response, "STOPPING", ack))
                    .await?;
                return Ok(Flow::Stop);
            }
            Intent::Error => {
                // Never answer an error with an error.
                tracing::warn!(
                    "ERROR packet from {}: {}",
                    packet.route.from,
                    packet.payload.get("error").unwrap_or(&serde_json::Value::Null)
                );
                return Ok(Flow::Continue);
            }
            _ => {}
        }

        match self.organ.handle(packet).await {
            Ok(Reply {
                intent,
                op_code,
                payload,
            }) => {
                summary.handled += 1;
                writer
                    .send(self.envelope(packet, intent, op_code, payload))
                    .await?;
            }
            Err(fault) => {
                summary.faults += 1;
                self.report_fault(packet, &fault);
                let reply = self.error_payload(packet, fault.kind(), &fault.to_string());
                writer
                    .send(self.envelope(packet, Intent::Error, "FAULT", reply))
                    .await?;
            }
        }
        Ok(Flow::Continue)
    }

    fn check_integrity(&self, packet: &Packet) -> Result<(), ProtocolError> {
        if packet.integrity.is_empty() && !self.config.require_integrity {
            return Ok(());
        }
        codec::check_integrity(packet)
    }

    fn report_fault(&self, packet: &Packet, fault: &HandlerFault) {
        tracing::error!(
            "Handler fault in {} for {} ({}/{}): {}",
            self.organ.urn(),
            packet.id,
            packet.instruction.intent,
            packet.instruction.op_code,
            fault
        );
    }

    fn error_payload(&self, packet: &Packet, kind: &str, message: &str) -> Value {
        json!({
            "error": message,
            "kind": kind,
            "original_id": packet.id,
            "original_intent": packet.instruction.intent.as_str(),
            "original_op_code": packet.instruction.op_code,
        })
    }

    /// Reply envelope: addressed to `reply_to`/sender, scope forwarded unchanged.
    fn envelope(
        &self,
        request: &Packet,
        intent: Intent,
        op_code: impl Into<String>,
        payload: Value,
    ) -> Packet {
        let mut reply = Packet::new(
            self.organ.urn(),
            request.route.reply_address(),
            intent,
            op_code,
            payload,
        )
        .with_scope(request.auth.scope)
        .with_priority(self.organ.priority())
        .with_ttl(self.config.default_ttl_ms)
        .with_version(self.config.protocol_version.clone())
        .with_health(self.organ.health());
        reply
            .extra
            .insert("correlation_id".to_string(), Value::String(request.id.clone()));
        reply
    }

    async fn emit_heartbeat<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut PacketWriter<W>,
    ) -> anyhow::Result<()> {
        self.heartbeat_seq += 1;
        let mut payload = json!({
            "urn": self.organ.urn(),
            "state": self.state,
            "heartbeat_seq": self.heartbeat_seq,
            "packets_processed": self.packet_count,
        });
        if let (Value::Object(base), Value::Object(vitals)) = (&mut payload, self.organ.vitals()) {
            base.extend(vitals);
        }
        let packet = Packet::new(
            self.organ.urn(),
            self.config.supervisor_urn.clone(),
            Intent::Heartbeat,
            "PULSE",
            payload,
        )
        .with_priority(self.organ.priority())
        .with_ttl(self.config.default_ttl_ms)
        .with_version(self.config.protocol_version.clone())
        .with_health(self.organ.health());
        tracing::debug!("Heartbeat #{} from {}", self.heartbeat_seq, self.organ.urn());
        writer.send(packet).await
    }
}

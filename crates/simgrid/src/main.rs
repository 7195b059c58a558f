//! `simgrid-region`: hosts one region over WebSocket.
//!
//! `SIMGRID_BIND` sets the listen address (default `0.0.0.0:9000`).
//! Setting `SIMGRID_DEMO_CIRCUIT` to a circuit code announces a single
//! demo agent under that code, for poking at the server without a login
//! service.

use simgrid::prelude::*;
use uuid::Uuid;

const DEFAULT_BIND: &str = "0.0.0.0:9000";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    simgrid::init_logging();

    let bind = std::env::var("SIMGRID_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let server = RegionServer::builder()
        .bind(&bind)
        .build(CircuitTable::new())
        .await?;

    if let Ok(code) = std::env::var("SIMGRID_DEMO_CIRCUIT") {
        let code: u32 = code.parse()?;
        let circuit = AgentCircuit {
            agent_id: AgentId(Uuid::new_v4()),
            session_id: SessionId(Uuid::new_v4()),
            secure_session_id: SessionId(Uuid::new_v4()),
            first_name: "Demo".into(),
            last_name: "Visitor".into(),
            start_position: Vector3::ZERO,
            child: false,
        };
        tracing::info!(
            code,
            agent_id = %circuit.agent_id.0,
            session_id = %circuit.session_id.0,
            "demo circuit announced"
        );
        server.authenticator().add_circuit(code, circuit);
    }

    server.run().await?;
    Ok(())
}

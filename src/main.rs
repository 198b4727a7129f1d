//! nav_negotiation demo
//!
//! Runs one service and poll worker per configured category over the
//! in-memory backend and plays a route negotiation:
//!
//! ```text
//! vessel ──request(route A)──▶ STCC
//! vessel ◀──counter(route B)── STCC      (picked up by the poll worker)
//! vessel ──accept────────────▶ STCC
//! ```

use anyhow::{Context, bail};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nav_negotiation::config::AppConfig;
use nav_negotiation::transport::CounterpartEndpoint;
use nav_negotiation::{
    CounterpartId, InMemoryTransport, NegotiationCategory, NegotiationMessage, NegotiationService,
    NegotiationTransport, Origin, PollWorker, TransactionId,
};

type Attachment = serde_json::Value;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Wait until the poll worker has merged `messages` messages for `id`
async fn wait_for_messages(
    service: &NegotiationService<Attachment>,
    id: TransactionId,
    messages: usize,
    limit: Duration,
) -> anyhow::Result<()> {
    tokio::time::timeout(limit, async {
        loop {
            if service
                .transaction(id)
                .is_some_and(|tx| tx.messages().len() >= messages)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .with_context(|| format!("transaction {} did not reach {} messages", id, messages))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = nav_negotiation::logging::init_logging(&app_config);

    tracing::info!("Starting nav_negotiation in {} mode", env);

    let transport = Arc::new(InMemoryTransport::<Attachment>::new());
    let dyn_transport: Arc<dyn NegotiationTransport<Attachment>> = transport.clone();

    let mut services = HashMap::new();
    let mut supervisors = Vec::new();
    for category in &app_config.categories {
        let service = Arc::new(NegotiationService::with_policy(
            category.category,
            app_config.local_role,
            dyn_transport.clone(),
            Arc::new(nav_negotiation::engine::NegotiationPolicy::<Attachment>::new(
                category.category,
                app_config.local_role,
                category.auto_acknowledge,
            )),
            app_config.node_id,
        ));
        let worker = Arc::new(PollWorker::new(service.clone(), category.poll_config()));
        supervisors.push(worker.clone().bind());
        services.insert(category.category, (service, worker));
    }

    let stcc = CounterpartId::new("stcc://sound-vts");
    transport.register_counterpart(
        NegotiationCategory::StrategicRoute,
        CounterpartEndpoint {
            id: stcc.clone(),
            name: "Sound VTS".into(),
        },
    );
    transport.connect();

    let Some((route, route_worker)) = services.get(&NegotiationCategory::StrategicRoute) else {
        bail!("strategic_route category is not configured");
    };
    if app_config.local_role != Origin::Requester {
        bail!("the demo negotiation is played from the requester side");
    }
    let wait_limit = route_worker.config().initial_delay + route_worker.config().interval * 4;

    let id = route
        .open(
            stcc.clone(),
            json!({ "name": "Route A", "waypoints": [[55.68, 12.60], [56.04, 12.63]] }),
            "Requesting approval",
        )
        .await?;

    // The STCC answers through the backend
    transport.push_remote(
        NegotiationCategory::StrategicRoute,
        id,
        stcc,
        NegotiationMessage::proposal(
            Origin::Authority,
            json!({ "name": "Route B", "waypoints": [[55.68, 12.60], [55.90, 12.70], [56.04, 12.63]] }),
            route.store().next_sent_at(id),
        )
        .with_comment("Please use the eastern lane"),
    )?;

    wait_for_messages(route, id, 2, wait_limit).await?;
    route.mark_read(id);
    let status = route.accept(id, "Thank you").await?;
    tracing::info!(transaction_id = %id, status = %status, "Negotiation finished");

    let snapshot = route.snapshot();
    println!("{}", serde_json::to_string_pretty(&*snapshot)?);
    println!("Counterparts: {:?}", route.counterparts());

    transport.disconnect();
    for (_, (_, worker)) in services {
        worker.on_disconnected().await;
    }
    for supervisor in supervisors {
        supervisor.abort();
    }

    Ok(())
}

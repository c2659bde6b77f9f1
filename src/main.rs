//! Billing service entry point.
//!
//! Serves gateway callbacks and runs the renewal scheduler on a fixed
//! interval against PostgreSQL.

use std::error::Error;
use std::sync::Arc;

use secrecy::SecretString;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use invoicer_billing::adapters::http::{callback_router, CallbackAppState};
use invoicer_billing::adapters::mpesa::{MpesaConfig, MpesaStkAdapter};
use invoicer_billing::adapters::postgres::{
    run_migrations, PostgresPaymentRepository, PostgresPlanCatalog, PostgresSubscriberDirectory,
    PostgresSubscriptionRepository,
};
use invoicer_billing::adapters::stripe::{StripeCardAdapter, StripeConfig};
use invoicer_billing::adapters::LoggingNotifier;
use invoicer_billing::application::{
    CallbackVerifier, GatewayRegistry, HandleGatewayCallbackHandler, PaymentLedger,
    RenewalScheduler, SubscriptionStateMachine,
};
use invoicer_billing::config::{AppConfig, MpesaSettings, StripeSettings};
use invoicer_billing::domain::billing::{
    BodySignatureVerifier, PaymentGateway, TimestampedSignatureVerifier,
};
use invoicer_billing::domain::foundation::Timestamp;
use invoicer_billing::ports::{Notifier, PlanCatalog, SubscriberDirectory, SubscriptionRepository};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    config.validate()?;

    tracing::info!(
        environment = ?config.server.environment,
        mpesa = ?config.mpesa,
        stripe = ?config.stripe,
        "Starting invoicer billing"
    );

    let pool = config
        .database
        .pool_options()
        .connect(&config.database.url)
        .await?;
    if config.database.run_migrations {
        run_migrations(&pool).await?;
        tracing::info!("Migrations applied");
    }

    // Storage
    let subscriptions: Arc<dyn SubscriptionRepository> =
        Arc::new(PostgresSubscriptionRepository::new(pool.clone()));
    let plans: Arc<dyn PlanCatalog> = Arc::new(PostgresPlanCatalog::new(pool.clone()));
    let directory: Arc<dyn SubscriberDirectory> =
        Arc::new(PostgresSubscriberDirectory::new(pool.clone()));
    let ledger = Arc::new(PaymentLedger::new(Arc::new(PostgresPaymentRepository::new(
        pool.clone(),
    ))));
    let notifier: Arc<dyn Notifier> = Arc::new(LoggingNotifier::new());

    // Gateways
    let gateways = GatewayRegistry::new()
        .with(Arc::new(MpesaStkAdapter::new(mpesa_config(&config.mpesa))))
        .with(Arc::new(StripeCardAdapter::new(stripe_config(&config.stripe))));

    let policy = config.billing.policy();
    let state_machine = Arc::new(SubscriptionStateMachine::new(
        subscriptions.clone(),
        plans.clone(),
        notifier.clone(),
        gateways.clone(),
        policy,
    ));

    let callbacks = HandleGatewayCallbackHandler::new(
        gateways.clone(),
        subscriptions.clone(),
        ledger.clone(),
        state_machine.clone(),
        notifier,
    )
    .with_verifier(
        PaymentGateway::MobileMoney,
        CallbackVerifier::Body(BodySignatureVerifier::new(SecretString::new(
            config.mpesa.callback_secret.clone(),
        ))?),
    )
    .with_verifier(
        PaymentGateway::Card,
        CallbackVerifier::Timestamped(TimestampedSignatureVerifier::new(SecretString::new(
            config.stripe.webhook_secret.clone(),
        ))?),
    );

    let scheduler = RenewalScheduler::new(
        subscriptions,
        plans,
        directory,
        gateways,
        ledger,
        state_machine,
        policy,
    );
    let sweep_interval = config.billing.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reports = scheduler.run_all(Timestamp::now()).await;
            for report in reports {
                tracing::info!(
                    sweep = report.sweep,
                    examined = report.examined,
                    processed = report.processed,
                    skipped = report.skipped,
                    failed = report.failed,
                    "Sweep finished"
                );
            }
        }
    });

    let app = callback_router()
        .with_state(CallbackAppState::new(Arc::new(callbacks)))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(config.server.request_timeout()))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening for gateway callbacks");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down");
    Ok(())
}

/// JSON lines in production, human-readable output elsewhere. `RUST_LOG`
/// overrides the configured filter.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.is_production() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

fn mpesa_config(settings: &MpesaSettings) -> MpesaConfig {
    let config = MpesaConfig::new(
        settings.consumer_key.clone(),
        settings.consumer_secret.clone(),
        settings.short_code.clone(),
        settings.passkey.clone(),
        settings.callback_url.clone(),
    );
    let config = if settings.is_production() {
        config.production()
    } else {
        config
    };
    match &settings.api_base_url {
        Some(url) => config.with_base_url(url.clone()),
        None => config,
    }
}

fn stripe_config(settings: &StripeSettings) -> StripeConfig {
    let config = StripeConfig::new(settings.api_key.clone());
    match &settings.api_base_url {
        Some(url) => config.with_base_url(url.clone()),
        None => config,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

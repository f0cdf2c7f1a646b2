//! Example: Issuing and verifying a liveness-proof token
//!
//! Run with: cargo run --example issue_token
//!
//! Set `RUST_LOG=slp_core=debug` to watch the counter store at work.

use slp_core::{Context, Ed25519Signer, SlpConfig, Token, Trigger, TriggerType};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("📍 Secure Liveness Proof - Example Usage\n");
    println!("==============================================\n");

    // Step 1: Signing key (in production, held by the secure element)
    println!("1️⃣  Generating device signing key...");
    let signer = Ed25519Signer::generate();
    let verifying_key = signer.verifying_key();
    println!("   ✓ Device public key: {:x?}...\n", &verifying_key.to_bytes()[..8]);

    // Step 2: Open the counter store (created at 0 on first run)
    println!("2️⃣  Initializing context...");
    let ctx = match std::env::var("SLP_CONFIG") {
        Ok(path) => {
            println!("   ✓ Config file: {}", path);
            Context::from_config_file(&path, signer)?
        }
        Err(_) => {
            let config = SlpConfig::default();
            println!("   ✓ Counter store: {}", config.storage_path.display());
            Context::initialize(&config, signer)?
        }
    };
    println!("   Current Hardware Counter: [{}]\n", ctx.get_counter()?);

    // Step 3: Simulate a trigger (entered the delivery zone)
    println!("3️⃣  Generating proof of physical work...");
    let trigger = Trigger::new(TriggerType::GpsGeofence, 123456789.0)
        .with_sensor_data(b"lat=52.5200;lon=13.4050;acc=4.2".to_vec());
    let token = ctx.generate_token(&trigger)?;
    println!("   ✓ Token: {}", token);
    println!("   Trigger: {}", token.trigger_type);
    println!("   Counter: {}\n", token.counter);

    // Step 4: Serialize to canonical CBOR for transport
    println!("4️⃣  Serializing to canonical CBOR...");
    let wire = token.to_bytes()?;
    println!("   ✓ Token size: {} bytes\n", wire.len());

    // Step 5: Simulate verifier
    println!("5️⃣  Simulating verifier...");
    let received = Token::from_bytes(&wire)?;
    let last_seen = received.counter.saturating_sub(1);
    match received
        .verify(&verifying_key)
        .and_then(|_| received.check_freshness(last_seen))
    {
        Ok(()) => println!("   ✅ Verification Result: [Success]\n"),
        Err(e) => println!("   ❌ Verification Result: [Fail] {}\n", e),
    }

    // Step 6: Local checks
    println!("6️⃣  Running local checks...");
    println!("   ✓ Store integrity: {}", ctx.check_integrity());
    println!("   ✓ Dormancy: {}", ctx.verify_dormancy());
    println!("   New Hardware Counter: [{}]\n", ctx.get_counter()?);

    println!("==============================================");
    println!("✅ Issuance workflow complete!");

    Ok(())
}

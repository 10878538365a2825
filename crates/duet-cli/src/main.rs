//! Duet command-line tool.
//!
//! # Usage
//!
//! ```bash
//! # Generate a key pair and print the exported public key
//! duet keygen
//!
//! # Run the two-participant demo over in-memory collaborators
//! duet demo --scheme key-pair
//! duet demo --scheme shared-secret --passphrase "correct horse" --replay full
//! ```

use std::{
    io::{self, Write},
    sync::Arc,
    time::Duration,
};

use clap::{Parser, Subcommand, ValueEnum};
use duet_client::{EngineConfig, SyncEngine, SystemEnv, cipher_for_peer, publish_self};
use duet_core::{
    ConversationId, Directory, IdentityProvider, ParticipantId, PlaintextMessage, Profile,
};
use duet_crypto::{KeyLifecycleManager, KeyPairCipher, Scheme, SharedSecret};
use duet_harness::{MemoryDirectory, MemoryIdentity, MemoryLog, ReplayMode};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Encrypted two-party messaging tools
#[derive(Parser, Debug)]
#[command(name = "duet")]
#[command(about = "Encrypted direct-messaging sync engine tools")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a key pair and print the public half as base64 SPKI
    Keygen {
        /// RSA modulus size in bits (at least 2048)
        #[arg(long, default_value = "2048")]
        bits: usize,
    },

    /// Run a conversation between two in-memory participants
    Demo {
        /// Encryption scheme both participants advertise
        #[arg(long, value_enum, default_value = "key-pair")]
        scheme: SchemeArg,

        /// Passphrase for the shared-secret scheme
        #[arg(long, default_value = "duet demo")]
        passphrase: String,

        /// How the log pushes updates to subscribers
        #[arg(long, value_enum, default_value = "delta")]
        replay: ReplayArg,

        /// Seconds to wait for the first snapshot
        #[arg(long, default_value = "10")]
        snapshot_timeout: u64,

        /// Messages exchanged, alternating between the participants
        #[arg(
            long = "message",
            default_values = ["Hi Bob!", "Hi Alice, got your key.", "Talk soon."]
        )]
        messages: Vec<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SchemeArg {
    SharedSecret,
    KeyPair,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReplayArg {
    Delta,
    Full,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    match args.command {
        Command::Keygen { bits } => keygen(bits).await,
        Command::Demo { scheme, passphrase, replay, snapshot_timeout, messages } => {
            let config = EngineConfig {
                snapshot_timeout: Duration::from_secs(snapshot_timeout),
                ..EngineConfig::default()
            };
            demo(scheme, &passphrase, replay, config, &messages).await
        },
    }
}

async fn keygen(bits: usize) -> Result<(), Box<dyn std::error::Error>> {
    let manager = KeyLifecycleManager::with_modulus_bits(bits)?;
    let keys = manager.generate_key_pair().await?;

    tracing::info!(bits, fingerprint = %keys.public_key().fingerprint(), "generated key pair");

    let mut out = io::stdout().lock();
    writeln!(out, "{}", manager.export_public_key(&keys).await?)?;
    Ok(())
}

async fn demo(
    scheme: SchemeArg,
    passphrase: &str,
    replay: ReplayArg,
    config: EngineConfig,
    messages: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let log = MemoryLog::with_mode(match replay {
        ReplayArg::Delta => ReplayMode::Delta,
        ReplayArg::Full => ReplayMode::Full,
    });
    let directory = MemoryDirectory::new();
    let identity = MemoryIdentity::new();
    let manager = KeyLifecycleManager::new();

    let alice_id = ParticipantId::new("u1")?;
    let bob_id = ParticipantId::new("u2")?;
    let alice_profile =
        Profile { id: alice_id.clone(), display_name: "Alice".into(), avatar_url: None };
    let bob_profile = Profile { id: bob_id.clone(), display_name: "Bob".into(), avatar_url: None };

    let (alice_keys, bob_keys, secret, schemes) = match scheme {
        SchemeArg::KeyPair => {
            let alice = manager.generate_key_pair().await?;
            let bob = manager.generate_key_pair().await?;
            (Some(alice), Some(bob), None, vec![Scheme::KeyPair])
        },
        SchemeArg::SharedSecret => {
            let secret = SharedSecret::from_passphrase(passphrase);
            (None, None, Some(secret), vec![Scheme::SharedSecret])
        },
    };

    publish_self(&directory, alice_profile.clone(), alice_keys.as_ref(), &schemes).await?;
    publish_self(&directory, bob_profile, bob_keys.as_ref(), &schemes).await?;
    identity.sign_in(alice_profile);

    let alice = SyncEngine::new(alice_id.clone(), Arc::new(log.clone()), SystemEnv, config.clone());
    let bob = SyncEngine::new(bob_id.clone(), Arc::new(log.clone()), SystemEnv, config);
    let follower = alice.follow_identity(identity.changes());

    let alice_peer = directory.lookup(&bob_id).await?.ok_or("bob is not listed")?;
    let bob_peer = directory.lookup(&alice_id).await?.ok_or("alice is not listed")?;
    let listed = directory.list_other_users(&alice_id).await?;
    tracing::info!(peers = listed.len(), "alice sees directory");

    let alice_cipher =
        cipher_for_peer(&manager, alice_keys.as_ref(), secret.as_ref(), &alice_peer).await?;
    let bob_cipher =
        cipher_for_peer(&manager, bob_keys.as_ref(), secret.as_ref(), &bob_peer).await?;
    alice.open(bob_id.clone(), alice_cipher).await?;
    bob.open(alice_id.clone(), bob_cipher).await?;

    let to_send = outgoing(messages);
    for &(index, text) in &to_send {
        let sender = if index % 2 == 0 { &alice } else { &bob };
        sender.set_draft(text);
        sender.send_draft().await?;
    }
    let expected = to_send.len();

    settle(&[&alice, &bob], expected).await?;

    let mut out = io::stdout().lock();
    let conversation = ConversationId::derive(&alice_id, &bob_id);
    writeln!(out, "conversation {conversation} ({})", schemes_label(&schemes))?;
    print_view(&mut out, "alice", &alice.messages())?;
    print_view(&mut out, "bob", &bob.messages())?;

    if let SchemeArg::KeyPair = scheme {
        let outsider = manager.generate_key_pair().await?;
        let unreadable = log
            .records(&conversation)
            .iter()
            .filter(|r| KeyPairCipher::decrypt_with(outsider.private_key(), &r.ciphertext).is_err())
            .count();
        writeln!(out, "outsider: {unreadable} of {expected} records unreadable")?;
    }

    identity.sign_out();
    drop(identity);
    follower.await?;
    bob.close();
    writeln!(out, "alice {}, bob {}", alice.state(), bob.state())?;

    Ok(())
}

async fn settle(
    engines: &[&SyncEngine<SystemEnv>],
    expected: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    tokio::time::timeout(Duration::from_secs(10), async {
        while engines.iter().any(|engine| engine.messages().len() < expected) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| "conversation did not settle")?;
    Ok(())
}

/// Messages worth sending, with their position in the alternation. Blank
/// entries are skipped, since the engine refuses them.
fn outgoing(messages: &[String]) -> Vec<(usize, &str)> {
    messages
        .iter()
        .enumerate()
        .filter_map(|(index, text)| {
            if text.trim().is_empty() {
                tracing::warn!(index, "skipping blank message");
                None
            } else {
                Some((index, text.as_str()))
            }
        })
        .collect()
}

fn schemes_label(schemes: &[Scheme]) -> String {
    schemes.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn print_view(out: &mut impl Write, reader: &str, view: &[PlaintextMessage]) -> io::Result<()> {
    writeln!(out, "{reader}:")?;
    for message in view {
        writeln!(out, "  {} {}: {}", message.sent_at, message.sender_id, message.text)?;
    }
    Ok(())
}

//! Ghost Ratchet Demo - two sessions exchanging messages through the Double Ratchet

use ghost_ratchet::{Envelope, RatchetConfig, SessionId, SessionRegistry, WireMessage};

fn main() {
    println!("=== Ghost Ratchet Demo ===\n");

    let registry = SessionRegistry::new(RatchetConfig::default()).expect("Invalid config");

    // The shared secret normally comes from an out-of-band handshake
    println!("Creating sessions from a shared secret...");
    let shared_secret = [0x5au8; 32];
    let alice_id = SessionId::from("alice");
    let bob_id = SessionId::from("bob");
    registry
        .create(alice_id.clone(), &shared_secret, true)
        .expect("Create failed");
    registry
        .create(bob_id.clone(), &shared_secret, false)
        .expect("Create failed");

    // Exchange messages
    println!("\n--- Message Exchange ---");

    let messages = [
        "Hello Bob! Every message gets a fresh key.",
        "Keys already used are gone for good.",
        "Reply whenever you like.",
    ];

    for (i, plaintext) in messages.iter().enumerate() {
        println!("\nAlice sends: \"{}\"", plaintext);
        let env = registry
            .encrypt(&alice_id, plaintext.as_bytes(), None)
            .expect("Encrypt failed");
        let wire = env.to_wire();
        println!(
            "  Encrypted header: {}...",
            &wire.header[..40.min(wire.header.len())]
        );
        println!(
            "  Encrypted body: {}...",
            &wire.body[..40.min(wire.body.len())]
        );

        let decrypted = registry
            .decrypt(&bob_id, &env, None)
            .expect("Decrypt failed");
        println!("Bob receives: \"{}\"", String::from_utf8_lossy(&decrypted));

        assert_eq!(
            plaintext.as_bytes(),
            &decrypted[..],
            "Message {} mismatch!",
            i
        );
    }

    println!("\n✓ All messages exchanged successfully!");

    // Bob's reply turns the ratchet
    println!("\n--- DH Ratchet ---");
    let reply = "Got them all. Rotating keys now.";
    println!("Bob sends: \"{}\"", reply);
    let env = registry
        .encrypt(&bob_id, reply.as_bytes(), None)
        .expect("Encrypt failed");

    // Carry it as JSON, the way a text transport would
    let json = env.to_wire().to_json().expect("Serialize failed");
    println!("  Wire JSON: {} bytes", json.len());
    let received = WireMessage::from_json(&json)
        .and_then(|w| Envelope::from_wire(&w))
        .expect("Parse failed");
    let decrypted = registry
        .decrypt(&alice_id, &received, None)
        .expect("Decrypt failed");
    println!("Alice receives: \"{}\"", String::from_utf8_lossy(&decrypted));

    let alice = registry.get(&alice_id).expect("Lookup failed");
    println!(
        "✓ Ratchet turned! Alice's previous chain length: {}",
        alice.prev_chain_len()
    );

    // Out-of-order delivery
    println!("\n--- Out-of-Order Delivery ---");
    let envs: Vec<_> = (1..=3)
        .map(|i| {
            registry
                .encrypt(&alice_id, format!("Message {}", i).as_bytes(), None)
                .expect("Encrypt failed")
        })
        .collect();
    for env in envs.iter().rev() {
        let decrypted = registry
            .decrypt(&bob_id, env, None)
            .expect("Decrypt failed");
        let bob = registry.get(&bob_id).expect("Lookup failed");
        println!(
            "Bob receives: \"{}\" (cached keys: {})",
            String::from_utf8_lossy(&decrypted),
            bob.skipped_key_count()
        );
    }

    // Tear everything down
    println!("\n--- Burn ---");
    let count = registry.destroy_all();
    println!("✓ Destroyed {} sessions", count);
    match registry.encrypt(&alice_id, b"too late", None) {
        Err(e) => println!("Encrypt after burn: {}", e),
        Ok(_) => println!("Encrypt after burn unexpectedly succeeded"),
    }

    println!("\n=== Demo Complete ===");
}

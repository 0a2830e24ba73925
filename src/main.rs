
use std::sync::Arc;
use std::time::Duration;
use stress_test::{stress_test_board, stress_test_scaling};
use tandem_model::{
    structurally_equal, Graph, NodeTemplate, ObjectKey, Scalar, TypeRegistry, Value,
};
use tandem_sdk::prelude::*;
use tandem_sdk::ClientConfigBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The whiteboard domain: a board of notes, each pinned at a position.
pub fn whiteboard_types() -> TypeRegistry {
    TypeRegistry::new()
        .with(
            NodeTemplate::new("Board")
                .value("title", "")
                .list("notes")
                .set("tags")
                .map("meta"),
        )
        .with(
            NodeTemplate::new("Note")
                .value("text", "")
                .value("position", Scalar::Null),
        )
        .with(NodeTemplate::new("Position2D").value("x", 0.0).value("y", 0.0))
}

/// Create a note at (`x`, `y`) and append it to the board.
pub fn add_note(
    graph: &mut Graph,
    types: &TypeRegistry,
    board: ObjectKey,
    text: &str,
    x: f64,
    y: f64,
) -> tandem_model::Result<ObjectKey> {
    let position = graph.create(types, "Position2D")?;
    graph.set_property(position, "x", x)?;
    graph.set_property(position, "y", y)?;
    let note = graph.create(types, "Note")?;
    graph.set_property(note, "text", text)?;
    graph.set_property(note, "position", position)?;
    let notes = graph.container(board, "notes")?;
    graph.list_push(notes, note)?;
    Ok(note)
}

fn describe(graph: &Graph, board: ObjectKey) -> tandem_model::Result<String> {
    let mut out = format!("  title: {}\n", graph.property(board, "title")?);
    let notes = graph.container(board, "notes")?;
    for (i, note) in graph.list_items(notes)?.iter().enumerate() {
        let Some(note) = note.as_object() else {
            continue;
        };
        let text = graph.property(note, "text")?;
        match graph.property(note, "position")?.as_object() {
            Some(position) => out.push_str(&format!(
                "  note {}: {} at ({}, {})\n",
                i,
                text,
                graph.property(position, "x")?,
                graph.property(position, "y")?
            )),
            None => out.push_str(&format!("  note {}: {}\n", i, text)),
        }
    }
    Ok(out)
}

fn first_position(graph: &Graph, board: ObjectKey) -> tandem_model::Result<Option<ObjectKey>> {
    let notes = graph.container(board, "notes")?;
    let Some(note) = graph.list_items(notes)?.first().and_then(Value::as_object) else {
        return Ok(None);
    };
    Ok(graph.property(note, "position")?.as_object())
}

fn converged(server: &Server, clients: &[&Client]) -> bool {
    let Some(server_root) = server.root() else {
        return false;
    };
    let server_graph = server.graph();
    clients.iter().all(|client| {
        let Some(client_root) = client.root() else {
            return false;
        };
        let client_graph = client.graph();
        let left = server_graph.lock();
        let right = client_graph.lock();
        structurally_equal(&left, server_root, &right, client_root)
    })
}

async fn whiteboard_demo() -> Result<(), BoxError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║            WHITEBOARD DEMO                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let types = Arc::new(whiteboard_types());
    let graph = Graph::new().shared();
    let board = {
        let mut graph = graph.lock();
        let board = graph.create(&types, "Board")?;
        graph.set_property(board, "title", "Retro")?;
        add_note(&mut graph, &types, board, "What went well", 10.0, 10.0)?;
        board
    };

    let server = Server::new(graph.clone(), board, types.clone(), ServerConfig::default())?;
    let alice = Client::connect(
        server.accept(PeerId::new("alice")).await?,
        types.clone(),
        ClientConfigBuilder::new().name("alice").build(),
    );
    let bob = Client::connect(
        server.accept(PeerId::new("bob")).await?,
        types.clone(),
        ClientConfigBuilder::new().name("bob").build(),
    );
    let alice_board = alice.wait_for_model().await?;
    let bob_board = bob.wait_for_model().await?;
    info!(peers = server.peers().len(), "whiteboard shared");

    // Alice drags the first note, Bob adds one, the server renames the board.
    {
        let graph = alice.graph();
        let mut graph = graph.lock();
        if let Some(position) = first_position(&graph, alice_board)? {
            graph.set_property(position, "x", 42.0)?;
            graph.set_property(position, "y", 7.5)?;
        }
    }
    {
        let graph = bob.graph();
        let mut graph = graph.lock();
        add_note(&mut graph, &types, bob_board, "What to improve", 120.0, 10.0)?;
    }
    graph.lock().set_property(board, "title", "Retro, sprint 12")?;

    let mut rounds = 0;
    while !converged(&server, &[&alice, &bob]) {
        rounds += 1;
        if rounds > 500 {
            return Err("replicas did not converge".into());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    println!("\nServer:\n{}", describe(&graph.lock(), board)?);
    println!("Alice:\n{}", describe(&alice.graph().lock(), alice_board)?);
    println!("Bob:\n{}", describe(&bob.graph().lock(), bob_board)?);
    println!("✓ All replicas converged");
    Ok(())
}

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())
}

async fn async_main() -> Result<(), BoxError> {
    whiteboard_demo().await?;

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ASYNC STRESS TESTS                               ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: few clients, short bursts
    let stats = stress_test_board(4, 100).await?;
    stats.print();

    // Test 2: more clients, longer bursts
    let stats = stress_test_board(10, 500).await?;
    stats.print();

    // Test 3: Scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(12, 4).await?;

    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}

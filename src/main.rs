use stress_test::{stress_test_scaling, stress_test_text};

#[tokio::main]
async fn main() {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            TEXT REPLICA STRESS TESTS                       ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut converged = true;

    // Test 1: scattered edits, small scale
    let stats = stress_test_text(4, 25, 4, false).await;
    stats.print();
    converged &= stats.converged;

    // Test 2: everyone typing at the document start
    let stats = stress_test_text(4, 25, 4, true).await;
    stats.print();
    converged &= stats.converged;

    // Test 3: scattered edits, medium scale
    let stats = stress_test_text(10, 50, 6, false).await;
    stats.print();
    converged &= stats.converged;

    // Test 4: scaling analysis
    converged &= stress_test_scaling(12, 4).await;

    if converged {
        println!("\n✓ All stress tests completed successfully!");
    } else {
        println!("\n✗ Some replicas diverged");
        std::process::exit(1);
    }
}

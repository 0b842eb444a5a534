use stress_test::{stress_test_publish, stress_test_scaling};

fn main() {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };
    rt.block_on(async_main());
}

async fn async_main() {

    // Run async stress tests
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ASYNC STRESS TESTS                               ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: few providers, short chains
    let stats = stress_test_publish(4, 100, 200).await;
    stats.print();

    // Test 2: more providers, longer chains
    let stats = stress_test_publish(10, 500, 1000).await;
    stats.print();

    // Test 3: Scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(20, 4).await;

    println!("\n✓ All stress tests completed successfully!");
}

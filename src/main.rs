use stress_test::{stress_test_list, stress_test_map, stress_test_scaling};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            REPLICA CONVERGENCE STRESS TESTS                 ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut all_converged = true;

    // Small scale
    for stats in [
        stress_test_map(4, 100, 200).await?,
        stress_test_list(4, 100, 200).await?,
        // Medium scale
        stress_test_map(10, 300, 1000).await?,
        stress_test_list(10, 200, 1000).await?,
    ] {
        stats.print();
        all_converged &= stats.converged;
    }

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS (Map)                            ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(12, 4).await?;

    if !all_converged {
        return Err("replicas diverged".into());
    }
    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only rerun if proto files change
    println!("cargo:rerun-if-changed=proto/grocery");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/grocery/inventory.proto",
                "proto/grocery/pricing.proto",
                "proto/grocery/robot.proto",
                "proto/grocery/coordination.proto",
            ],
            &["proto"],
        )?;
    Ok(())
}

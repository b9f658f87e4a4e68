//! Generates the `dispatch.sdk.v1` message and service types from the `.proto`
//! sources under `proto/`: a single code generation step feeding `OUT_DIR`,
//! wired into `src/pb.rs` via `include!`.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile(
            &[
                "proto/dispatch/sdk/v1/status.proto",
                "proto/dispatch/sdk/v1/error.proto",
                "proto/dispatch/sdk/v1/call.proto",
                "proto/dispatch/sdk/v1/poll.proto",
                "proto/dispatch/sdk/v1/exit.proto",
                "proto/dispatch/sdk/v1/function.proto",
                "proto/dispatch/sdk/v1/dispatch.proto",
            ],
            &["proto"],
        )?;
    Ok(())
}

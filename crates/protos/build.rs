fn main() -> anyhow::Result<()> {
	let files = [
		"proto/envoy/config/core/v3/base.proto",
		"proto/envoy/type/v3/http_status.proto",
		"proto/envoy/extensions/filters/http/ext_proc/v3/processing_mode.proto",
		"proto/envoy/service/ext_proc/v3/external_processor.proto",
		"proto/grpc/health/v1/health.proto",
	];
	// protox is a pure-Rust protoc, so builds do not need a system protobuf
	// toolchain. Well-known types (google.protobuf.Struct) come bundled.
	let fds = protox::compile(files, ["proto"])?;
	tonic_prost_build::configure()
		.build_client(true)
		.build_server(true)
		.compile_fds(fds)?;
	println!("cargo:rerun-if-changed=proto");
	Ok(())
}

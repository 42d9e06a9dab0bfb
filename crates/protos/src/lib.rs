//! Generated protobuf and gRPC types for the external-processor surface.
//!
//! The definitions under `proto/` are a trimmed, wire-compatible subset of
//! Envoy's `ext_proc` v3 API plus the standard gRPC health protocol. The rest
//! of the workspace treats these as opaque generated types.

pub mod envoy {
	pub mod config {
		pub mod core {
			pub mod v3 {
				tonic::include_proto!("envoy.config.core.v3");
			}
		}
	}

	pub mod r#type {
		pub mod v3 {
			tonic::include_proto!("envoy.r#type.v3");
		}
	}

	pub mod extensions {
		pub mod filters {
			pub mod http {
				pub mod ext_proc {
					pub mod v3 {
						tonic::include_proto!("envoy.extensions.filters.http.ext_proc.v3");
					}
				}
			}
		}
	}

	pub mod service {
		pub mod ext_proc {
			pub mod v3 {
				tonic::include_proto!("envoy.service.ext_proc.v3");
			}
		}
	}
}

pub mod grpc {
	pub mod health {
		pub mod v1 {
			tonic::include_proto!("grpc.health.v1");
		}
	}
}

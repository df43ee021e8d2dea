pub mod conntrack_port;
pub mod metrics_port;
pub mod queue_socket_port;
pub mod rule_installer_port;

//! Service names a session may open logical channels for.

/// Every service name the remote end accepts in an open-channel request.
///
/// The set is fixed by protocol convention; anything outside it is rejected
/// locally before a request is issued.
pub const SERVICES: &[&str] = &[
	"audio",
	"chat",
	"eval",
	"exec",
	"fsevents",
	"interp",
	"interp2",
	"ot",
	"packager2",
	"packager3",
	"presences",
	"shellrun",
	"shellrun2",
	"run",
	"run2",
	"shell",
];

/// Returns true if `service` names a channel the protocol knows about.
pub fn is_known_service(service: &str) -> bool {
	SERVICES.contains(&service)
}

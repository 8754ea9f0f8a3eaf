/*!
# GPU Stats Core - Briques partagées du relais de télémétrie GPU

Bibliothèque commune au kernel et à l'agent :
- Snapshot GPU et lecture via `nvidia-smi`
- Store "dernière valeur" par device
- Registre des abonnés SSE avec diffusion best-effort
- Boucles périodiques annulables (stream / push)
*/

pub mod env;
pub mod periodic;
pub mod publisher;
pub mod sampler;
pub mod snapshot;
pub mod sse;
pub mod store;
pub mod subscribers;

pub use env::parse_flag;
pub use periodic::{spawn_periodic, PeriodicHandle};
pub use publisher::{StreamPublisher, TickOutcome};
pub use sampler::{NvidiaSmi, SampleError, SnapshotSource, DEFAULT_SAMPLE_TIMEOUT};
pub use snapshot::GpuSnapshot;
pub use sse::{event_stream, Frame};
pub use store::{DeviceEntry, LatestStore};
pub use subscribers::{SubscriberRegistry, Subscription};

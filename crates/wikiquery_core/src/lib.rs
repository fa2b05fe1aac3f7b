pub mod cancel;
pub mod config;
pub mod continuation;
pub mod driver;
pub mod edit;
pub mod error;
pub mod listing;
pub mod page;
pub mod params;
pub mod partition;
pub mod refresh;
pub mod resolve;
pub mod site;
pub mod subject;
pub mod transport;

pub use cancel::CancellationToken;
pub use config::{ClientConfig, Credentials, WikiConfig, load_config};
pub use driver::{DriverOptions, QueryPages};
pub use error::{ApiError, ApiErrorKind, Result, WikiError};
pub use page::{PageEntity, PageQueryOptions, RevisionEntity, RevisionOrder};
pub use params::{ParamValue, QueryParameters};
pub use partition::{PrivilegeTier, SiteLimits};
pub use subject::Subject;
pub use transport::{ApiTransport, HttpTransport};

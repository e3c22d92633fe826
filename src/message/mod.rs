//! Wire types shared with the record layer and handshake.

mod application_data;
pub use application_data::ApplicationData;

mod named_curve;
pub use named_curve::NamedCurve;

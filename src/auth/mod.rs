mod verifier;

pub use verifier::{
    parse_basic_auth, parse_device_type, AuthFailure, BasicCredentials, CredentialVerifier,
    DeviceIdentity,
};

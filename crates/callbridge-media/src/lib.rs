//! Telephony audio pipeline: inbound framing and gap compensation, the
//! recognition relay, utterance aggregation, speech synthesis, and ordered
//! outbound dispatch.

pub mod aggregator;
pub mod dispatcher;
pub mod framer;
pub mod relay;
pub mod synth;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::error::ThrottleError;

/// The number of traffic categories that are throttled independently. If a category is added
///  or removed, this number must change as well.
pub const CATEGORY_COUNT: usize = 8;

/// Traffic classes of outgoing packets. Each category has its own token bucket and its own
///  outgoing queue.
///
/// NB: The discriminants are the category indices used throughout the protocol, and the order
///      of the first seven is the order of the throttle values on the wire. `State` is not sent
///      on the wire: it is carved out of `Task`'s allocation.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum ThrottleCategory {
    /// Packets that are re-sent by the reliability layer. This is the lowest priority category,
    ///  and it is fed by the reliability layer itself rather than by an external producer.
    Resend = 0,
    Land = 1,
    Wind = 2,
    Cloud = 3,
    /// Object updates other than avatar and prim state
    Task = 4,
    Texture = 5,
    Asset = 6,
    /// Avatar and prim state updates
    State = 7,
}

impl ThrottleCategory {
    pub const ALL: [ThrottleCategory; CATEGORY_COUNT] = [
        ThrottleCategory::Resend,
        ThrottleCategory::Land,
        ThrottleCategory::Wind,
        ThrottleCategory::Cloud,
        ThrottleCategory::Task,
        ThrottleCategory::Texture,
        ThrottleCategory::Asset,
        ThrottleCategory::State,
    ];

    /// Categories in the order they are sent on the wire
    pub const WIRE_ORDER: [ThrottleCategory; CATEGORY_COUNT - 1] = [
        ThrottleCategory::Resend,
        ThrottleCategory::Land,
        ThrottleCategory::Wind,
        ThrottleCategory::Cloud,
        ThrottleCategory::Task,
        ThrottleCategory::Texture,
        ThrottleCategory::Asset,
    ];

    pub fn index(self) -> usize {
        let raw: u8 = self.into();
        raw as usize
    }

    /// Resolves a raw category index as it is used by packet producers. Indices outside the
    ///  fixed set of categories (including the protocol's 'unknown' marker -1) are rejected.
    pub fn from_raw(raw: i32) -> Result<ThrottleCategory, ThrottleError> {
        u8::try_from(raw).ok()
            .and_then(|raw| ThrottleCategory::try_from_primitive(raw).ok())
            .ok_or(ThrottleError::InvalidCategory(raw))
    }

    /// Whether an empty outgoing queue of this category is reported to the producer. Resend
    ///  traffic is fed by the reliability layer, so there is nobody to notify.
    pub fn emits_queue_empty(self) -> bool {
        self != ThrottleCategory::Resend
    }
}

pub mod account;
pub mod location;
pub mod promotion;

pub use account::{
    AccountDetails, Audience, DisplayName, OtpCode, Password, PhoneNumber, Username,
};
pub use location::{Area, Location, PinCode};
pub use promotion::{
    ImageAttachment, OwnerId, PaymentReceipt, PromotionDraft, PromotionId, ShopContext, ShopId,
};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const TITLE_MAX: usize = 80;
const MESSAGE_MAX: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShopId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromotionId(pub i64);

/// The signed-in shop a promotion is created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopContext {
    pub shop_id: ShopId,
    pub owner_id: OwnerId,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for ImageAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAttachment")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImageAttachment {
    fn check(&self) -> Result<(), ValidationError> {
        if self.file_name.trim().is_empty() || self.bytes.is_empty() {
            return Err(ValidationError::new("image", "please upload a promotion image"));
        }
        if !self.content_type.trim().to_ascii_lowercase().starts_with("image/") {
            return Err(ValidationError::new(
                "image",
                "please select a valid image file (PNG or JPG)",
            ));
        }
        if self.bytes.len() > MAX_IMAGE_BYTES {
            return Err(ValidationError::new("image", "file size should be less than 5MB"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionDraft {
    pub title: String,
    pub message: String,
    pub image: ImageAttachment,
}

impl PromotionDraft {
    pub fn parse(
        title: &str,
        message: &str,
        image: ImageAttachment,
    ) -> Result<Self, ValidationError> {
        let title = title.trim();
        let message = message.trim();
        if title.is_empty() || message.is_empty() {
            return Err(ValidationError::new(
                if title.is_empty() { "title" } else { "message" },
                "please fill in both promotion title and message",
            ));
        }
        if title.chars().count() > TITLE_MAX {
            return Err(ValidationError::new("title", "title must be at most 80 characters"));
        }
        if message.chars().count() > MESSAGE_MAX {
            return Err(ValidationError::new("message", "message must be at most 500 characters"));
        }
        image.check()?;

        Ok(Self { title: title.to_string(), message: message.to_string(), image })
    }
}

/// Values returned by the checkout widget after the customer pays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

impl PaymentReceipt {
    pub fn parse(
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<Self, ValidationError> {
        let fields = [("order_id", order_id), ("payment_id", payment_id), ("signature", signature)];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(ValidationError::new(field, format!("{field} is required")));
            }
        }
        Ok(Self {
            order_id: order_id.trim().to_string(),
            payment_id: payment_id.trim().to_string(),
            signature: signature.trim().to_ascii_lowercase(),
        })
    }
}

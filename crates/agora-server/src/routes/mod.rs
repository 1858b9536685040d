pub mod chats;
pub mod messages;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;

use agora_chat::{ChatError, FileUpload};
use agora_types::api::AttachmentBody;

fn decode_attachment(body: AttachmentBody) -> Result<FileUpload, ChatError> {
    let bytes = B64
        .decode(&body.data)
        .map_err(|e| ChatError::Validation(format!("attachment is not valid base64: {}", e)))?;
    Ok(FileUpload::new(body.file_name, bytes))
}

// External collaborators: metadata extraction and media download behind trait seams.

pub mod extract;
pub mod traits;
pub mod ytdlp;

//! Export pipeline.
//!
//! Produces the ZIP archive the target chat service ingests for a
//! one-time migration: a users table, a channels table, and one
//! messages table (plus optional uploads table) per channel.

use log::{debug, info};
use std::{
    collections::HashSet,
    fs, io,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    result,
};
use thiserror::Error;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::{format, slugify, store, BodyFormatter, Directory, Message, MessageStore};

/// Download filename of the produced archive.
pub const EXPORT_FILENAME: &str = "export.zip";
/// Fixed working directory, recreated on every run.
pub const EXPORT_WORKDIR: &str = "export";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot recreate export working directory {1}")]
    RecreateWorkdirError(#[source] io::Error, PathBuf),
    #[error("cannot create channel directory {1}")]
    CreateChannelDirError(#[source] io::Error, PathBuf),
    #[error("cannot write csv table {1}")]
    WriteCsvError(#[source] csv::Error, PathBuf),
    #[error("cannot flush csv table {1}")]
    FlushCsvError(#[source] io::Error, PathBuf),
    #[error("cannot walk export working directory")]
    WalkWorkdirError(#[source] io::Error),
    #[error("cannot read export file {1}")]
    ReadExportFileError(#[source] io::Error, PathBuf),
    #[error("cannot build export archive")]
    BuildArchiveError(#[source] zip::result::ZipError),
    #[error("cannot write export archive")]
    WriteArchiveError(#[source] io::Error),

    #[error(transparent)]
    FormatError(#[from] format::Error),
    #[error(transparent)]
    StoreError(#[from] store::Error),
}

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ChannelKind {
    Direct,
    Private,
}

impl ChannelKind {
    pub fn as_key(&self) -> &'static str {
        match self {
            ChannelKind::Direct => "direct",
            ChannelKind::Private => "private",
        }
    }
}

/// An exported channel: a direct two-party conversation or a private
/// multi-party one.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExportChannel {
    /// Root message id, used to regather the channel's messages. Not
    /// part of the emitted table.
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub kind: ChannelKind,
    /// Participant id, or a `;`-joined id list for private channels.
    pub participants: String,
}

pub struct Exporter<'a> {
    directory: &'a dyn Directory,
    messages: &'a dyn MessageStore,
    formatter: BodyFormatter,
    /// Parent of the fixed working directory.
    root: PathBuf,
}

impl<'a> Exporter<'a> {
    pub fn new<P: Into<PathBuf>>(
        directory: &'a dyn Directory,
        messages: &'a dyn MessageStore,
        root: P,
    ) -> Result<Self> {
        Ok(Self {
            directory,
            messages,
            formatter: BodyFormatter::new()?,
            root: root.into(),
        })
    }

    /// Builds the export archive and returns its bytes, to be served
    /// under the name [`EXPORT_FILENAME`].
    ///
    /// The fixed working directory is deleted and recreated on every
    /// run: overlapping invocations are not supported and would
    /// corrupt each other's output.
    pub fn export(&self, user_ids: Option<&[i64]>) -> Result<Vec<u8>> {
        let workdir = self.root.join(EXPORT_WORKDIR);
        if workdir.is_dir() {
            fs::remove_dir_all(&workdir)
                .map_err(|err| Error::RecreateWorkdirError(err, workdir.clone()))?;
        }
        fs::create_dir_all(&workdir)
            .map_err(|err| Error::RecreateWorkdirError(err, workdir.clone()))?;

        let users = self.directory.active_users(user_ids)?;
        let user_rows: Vec<Vec<String>> = users
            .iter()
            .map(|user| {
                vec![
                    user.id.to_string(),
                    user.email.clone(),
                    user.full_name.clone(),
                ]
            })
            .collect();
        write_csv(&workdir.join("users.csv"), &user_rows)?;

        let user_ids: Vec<i64> = users.iter().map(|user| user.id).collect();
        let channels = self.derive_channels(&user_ids)?;
        let channel_rows: Vec<Vec<String>> = channels
            .iter()
            .map(|channel| {
                vec![
                    channel.name.clone(),
                    channel.owner_id.to_string(),
                    channel.kind.as_key().to_owned(),
                    channel.participants.clone(),
                ]
            })
            .collect();
        write_csv(&workdir.join("channels.csv"), &channel_rows)?;

        for channel in &channels {
            self.export_channel(&workdir, channel, &user_ids)?;
        }

        let archive = archive_workdir(&workdir)?;
        info!(
            "exported {} users and {} channels ({} bytes)",
            user_rows.len(),
            channels.len(),
            archive.len()
        );
        Ok(archive)
    }

    /// Derives the channel list from the visible thread roots.
    pub fn derive_channels(&self, user_ids: &[i64]) -> Result<Vec<ExportChannel>> {
        let user_set: HashSet<i64> = user_ids.iter().copied().collect();
        let mut channels = vec![];

        for root in self.messages.channel_roots(user_ids)? {
            match root.multi_conversation_id {
                Some(conversation_id) => {
                    let participants: Vec<String> = self
                        .directory
                        .conversation_participants(conversation_id)?
                        .into_iter()
                        .filter(|id| user_set.contains(id))
                        .map(|id| id.to_string())
                        .collect();
                    if participants.is_empty() {
                        continue;
                    }
                    channels.push(ExportChannel {
                        id: root.id,
                        name: format!("{}-{}", slugify(&root.subject), root.id),
                        owner_id: root.sender_id,
                        kind: ChannelKind::Private,
                        participants: participants.join(";"),
                    });
                }
                None => {
                    let recipient_id = match root.recipient_id {
                        Some(recipient_id) => recipient_id,
                        None => continue,
                    };
                    if !user_set.contains(&root.sender_id) || !user_set.contains(&recipient_id) {
                        continue;
                    }
                    channels.push(ExportChannel {
                        id: root.id,
                        name: slugify(&format!("{} x {}", root.sender_id, recipient_id)),
                        owner_id: root.sender_id,
                        kind: ChannelKind::Direct,
                        participants: recipient_id.to_string(),
                    });
                }
            }
        }

        Ok(channels)
    }

    fn export_channel(
        &self,
        workdir: &Path,
        channel: &ExportChannel,
        user_ids: &[i64],
    ) -> Result<()> {
        let messages = self.messages.channel_messages(channel.id, user_ids)?;
        if messages.is_empty() {
            return Ok(());
        }
        debug!(
            "exporting channel {} with {} messages",
            channel.name,
            messages.len()
        );

        let channel_dir = workdir.join(&channel.name);
        fs::create_dir_all(&channel_dir)
            .map_err(|err| Error::CreateChannelDirError(err, channel_dir.clone()))?;

        let mut message_rows = vec![];
        let mut upload_rows = vec![];
        for message in &messages {
            let timestamp = message.sent_at.timestamp_millis();
            message_rows.push(vec![
                message.sender_id.to_string(),
                timestamp.to_string(),
                self.format_message(message),
            ]);

            for attachment in self.messages.attachments(message.id)? {
                upload_rows.push(vec![
                    message.sender_id.to_string(),
                    timestamp.to_string(),
                    attachment.download_url,
                ]);
            }
        }

        write_csv(&channel_dir.join("messages.csv"), &message_rows)?;
        if !upload_rows.is_empty() {
            write_csv(&channel_dir.join("uploads.csv"), &upload_rows)?;
        }
        Ok(())
    }

    /// Reformatted body, prefixed with the bolded subject when present.
    fn format_message(&self, message: &Message) -> String {
        let text = self.formatter.reformat(&message.body);
        if message.subject.is_empty() {
            text
        } else {
            format!("*{}*\n{}", message.subject, text)
        }
    }
}

fn write_csv(path: &Path, rows: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_path(path)
        .map_err(|err| Error::WriteCsvError(err, path.to_owned()))?;
    for row in rows {
        writer
            .write_record(row)
            .map_err(|err| Error::WriteCsvError(err, path.to_owned()))?;
    }
    writer
        .flush()
        .map_err(|err| Error::FlushCsvError(err, path.to_owned()))?;
    Ok(())
}

fn archive_workdir(workdir: &Path) -> Result<Vec<u8>> {
    let mut entries = vec![];
    collect_entries(workdir, workdir, &mut entries).map_err(Error::WalkWorkdirError)?;
    entries.sort();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in entries {
        zip.start_file(entry.clone(), options)
            .map_err(Error::BuildArchiveError)?;
        let path = workdir.join(&entry);
        let bytes =
            fs::read(&path).map_err(|err| Error::ReadExportFileError(err, path.clone()))?;
        zip.write_all(&bytes).map_err(Error::WriteArchiveError)?;
    }

    let cursor = zip.finish().map_err(Error::BuildArchiveError)?;
    Ok(cursor.into_inner())
}

fn collect_entries(root: &Path, dir: &Path, entries: &mut Vec<String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_entries(root, &path, entries)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.push(name);
        }
    }
    Ok(())
}

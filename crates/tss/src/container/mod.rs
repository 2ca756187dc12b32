//! The `.tss` container.
//!
//! A container is a deflate-compressed zip archive with exactly two members:
//! the encoded video ([`VIDEO_MEMBER`]) and the serialized
//! [`Recording`] ([`RECORD_MEMBER`]). Sample frame indices and video frame
//! positions share one coordinate space.
//!
//! A [`ContainerManager`] is bound to one archive path. Exports work on an
//! extracted copy: an explicit [`ContainerManager::extract`] is reused by
//! later exports, otherwise the archive is unpacked into a scratch directory
//! that is removed again when the export finishes.

pub mod report;
pub mod table;

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::telemetry::Recording;
use crate::video::{RawVideoDecoder, VideoDecoder};

pub use report::{ReportLayout, ReportSummary};
pub use table::{FrameRange, DEFAULT_START_FRAME};

/// Archive member holding the video.
pub const VIDEO_MEMBER: &str = "movie.mp4";

/// Archive member holding the recording.
pub const RECORD_MEMBER: &str = "data.json";

/// File extension of containers.
pub const EXTENSION: &str = "tss";

/// Name of the automatic extraction directory.
pub const SCRATCH_DIR_NAME: &str = "~temp";

/// Options for [`ContainerManager::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Remove the source video and recording after a successful write.
    pub delete_originals: bool,
    /// Replace an existing archive at the destination.
    pub overwrite: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            delete_originals: true,
            overwrite: false,
        }
    }
}

#[derive(Debug)]
struct Extraction {
    dir: PathBuf,
    scratch: bool,
}

/// Saves, extracts and exports one container archive.
pub struct ContainerManager {
    archive: PathBuf,
    scratch_dir: PathBuf,
    force_scratch: bool,
    decoder: Arc<dyn VideoDecoder>,
    extraction: Option<Extraction>,
}

impl fmt::Debug for ContainerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerManager")
            .field("archive", &self.archive)
            .field("scratch_dir", &self.scratch_dir)
            .field("force_scratch", &self.force_scratch)
            .field("extraction", &self.extraction)
            .finish_non_exhaustive()
    }
}

impl ContainerManager {
    /// Bind a manager to an archive path.
    ///
    /// Automatic extractions go to a `~temp` directory beside the archive
    /// and replace whatever occupies it.
    #[must_use]
    pub fn new(archive: impl Into<PathBuf>) -> Self {
        let archive = archive.into();
        let scratch_dir = archive
            .parent()
            .map_or_else(|| PathBuf::from(SCRATCH_DIR_NAME), |p| p.join(SCRATCH_DIR_NAME));
        Self {
            archive,
            scratch_dir,
            force_scratch: true,
            decoder: Arc::new(RawVideoDecoder),
            extraction: None,
        }
    }

    /// Use a different directory for automatic extractions.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Whether an occupied scratch directory may be replaced.
    ///
    /// When `false`, an occupied scratch directory makes exports fail with
    /// [`Error::ExtractFailed`].
    #[must_use]
    pub fn force_scratch(mut self, force: bool) -> Self {
        self.force_scratch = force;
        self
    }

    /// Use a different decoder for the video member.
    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn VideoDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// The archive this manager is bound to.
    #[must_use]
    pub fn archive_path(&self) -> &Path {
        &self.archive
    }

    /// The scratch directory for automatic extractions.
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// The remembered extraction directory, if any.
    #[must_use]
    pub fn extracted_dir(&self) -> Option<&Path> {
        self.extraction.as_ref().map(|e| e.dir.as_path())
    }

    /// Title used for reports: the archive's file stem.
    #[must_use]
    pub fn title(&self) -> String {
        self.archive
            .file_stem()
            .map_or_else(|| "recording".to_string(), |s| s.to_string_lossy().into_owned())
    }

    /// Write a new archive from a video artifact and a recording file.
    ///
    /// The archive is written beside its destination and moved into place,
    /// so a failed save never leaves a partial archive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the archive exists and
    /// `options.overwrite` is false, or an I/O or zip error.
    pub fn save(&self, video: &Path, record: &Path, options: SaveOptions) -> Result<()> {
        if self.archive.exists() && !options.overwrite {
            return Err(Error::already_exists(&self.archive));
        }

        let partial = partial_path(&self.archive);
        if let Err(e) = write_archive(&partial, video, record) {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        if let Err(e) = fs::rename(&partial, &self.archive) {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }

        if options.delete_originals {
            fs::remove_file(video)?;
            fs::remove_file(record)?;
        }

        info!(path = %self.archive.display(), "Saved container");
        Ok(())
    }

    /// Unpack both members into `dir` and remember it for later exports.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the archive is missing,
    /// [`Error::AlreadyExists`] if `dir` exists and `exists_ok` is false, or
    /// [`Error::InvalidContainer`] if a member is missing.
    pub fn extract(&mut self, dir: impl AsRef<Path>, exists_ok: bool) -> Result<()> {
        let dir = dir.as_ref();
        if !self.archive.exists() {
            return Err(Error::not_found(&self.archive));
        }
        if dir.exists() {
            if !exists_ok {
                return Err(Error::already_exists(dir));
            }
            fs::remove_dir_all(dir)?;
        }

        if let Err(e) = self.unpack(dir) {
            let _ = fs::remove_dir_all(dir);
            return Err(e);
        }

        self.release_scratch();
        self.extraction = Some(Extraction {
            dir: dir.to_path_buf(),
            scratch: false,
        });
        info!(archive = %self.archive.display(), dir = %dir.display(), "Extracted container");
        Ok(())
    }

    /// Delete the remembered extraction, explicit or automatic.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn invalidate(&mut self) -> Result<()> {
        if let Some(extraction) = self.extraction.take() {
            match fs::remove_dir_all(&extraction.dir) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                _ => debug!(dir = %extraction.dir.display(), "Invalidated extraction"),
            }
        }
        Ok(())
    }

    /// Read the recording straight from the archive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the archive is missing or
    /// [`Error::InvalidContainer`] if it has no recording member.
    pub fn load_recording(&self) -> Result<Recording> {
        let mut archive = self.open_archive()?;
        let member = match archive.by_name(RECORD_MEMBER) {
            Ok(member) => member,
            Err(ZipError::FileNotFound) => {
                return Err(self.invalid(format!("missing member '{RECORD_MEMBER}'")))
            }
            Err(e) => return Err(e.into()),
        };
        Recording::from_reader(BufReader::new(member))
    }

    /// Export samples within `range` as a comma-separated table.
    ///
    /// Returns the number of data rows written. Any automatic extraction is
    /// removed afterwards, whether or not the export succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if `output` exists and `exists_ok` is
    /// false, [`Error::ExtractFailed`] if the scratch directory is occupied,
    /// or the error that interrupted the export.
    pub fn export_table(
        &mut self,
        output: impl AsRef<Path>,
        range: FrameRange,
        exists_ok: bool,
    ) -> Result<usize> {
        let output = output.as_ref();
        if output.exists() && !exists_ok {
            return Err(Error::already_exists(output));
        }

        let rows = self.with_extraction(|dir| {
            let recording = Recording::read_json(dir.join(RECORD_MEMBER))?;
            let file = File::create(output)?;
            table::write_table(&recording, range, BufWriter::new(file)).map_err(|e| {
                let _ = fs::remove_file(output);
                Error::from(e)
            })
        })?;

        info!(output = %output.display(), rows, "Exported table");
        Ok(rows)
    }

    /// Export an illustrated Markdown report into `output_dir`.
    ///
    /// Any automatic extraction is removed afterwards, whether or not the
    /// export succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the archive is missing, leaving any
    /// previous report untouched, [`Error::AlreadyExists`] if the image
    /// folder or the document exist and `exists_ok` is false,
    /// [`Error::ExtractFailed`] if the
    /// scratch directory is occupied, or the error that interrupted the export.
    pub fn export_report(
        &mut self,
        output_dir: impl AsRef<Path>,
        exists_ok: bool,
    ) -> Result<ReportSummary> {
        let layout = ReportLayout::new(output_dir.as_ref(), &self.title());
        let decoder = Arc::clone(&self.decoder);
        let summary = self.with_extraction(|dir| {
            // Only touch existing output once the archive has unpacked.
            layout.clear(exists_ok)?;
            let recording = Recording::read_json(dir.join(RECORD_MEMBER))?;
            let mut video = decoder.open(&dir.join(VIDEO_MEMBER))?;
            report::write_report(&layout, &recording, video.as_mut())
        })?;

        info!(
            document = %summary.document.display(),
            sections = summary.sections,
            images = summary.images,
            "Exported report"
        );
        Ok(summary)
    }

    /// Run `f` against an extraction, then drop any automatic one.
    fn with_extraction<T>(&mut self, f: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
        let dir = self.acquire_extraction()?;
        let result = f(&dir);
        self.release_scratch();
        result
    }

    fn acquire_extraction(&mut self) -> Result<PathBuf> {
        if let Some(extraction) = &self.extraction {
            if extraction.dir.is_dir() {
                return Ok(extraction.dir.clone());
            }
            warn!(dir = %extraction.dir.display(), "Extraction disappeared, extracting again");
            self.extraction = None;
        }

        let scratch = self.scratch_dir.clone();
        match self.extract(&scratch, self.force_scratch) {
            Ok(()) => {
                if let Some(extraction) = &mut self.extraction {
                    extraction.scratch = true;
                }
                Ok(scratch)
            }
            Err(Error::AlreadyExists { path }) => Err(Error::ExtractFailed {
                path,
                reason: "scratch directory is occupied".to_string(),
            }),
            Err(Error::Io(e)) => Err(Error::ExtractFailed {
                path: scratch,
                reason: e.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    fn release_scratch(&mut self) {
        if !self.extraction.as_ref().is_some_and(|e| e.scratch) {
            return;
        }
        if let Some(extraction) = self.extraction.take() {
            match fs::remove_dir_all(&extraction.dir) {
                Ok(()) => debug!(dir = %extraction.dir.display(), "Removed scratch extraction"),
                Err(e) => {
                    warn!(dir = %extraction.dir.display(), error = %e, "Failed to remove scratch extraction");
                }
            }
        }
    }

    fn unpack(&self, dir: &Path) -> Result<()> {
        let mut archive = self.open_archive()?;
        for member in [VIDEO_MEMBER, RECORD_MEMBER] {
            if archive.index_for_name(member).is_none() {
                return Err(self.invalid(format!("missing member '{member}'")));
            }
        }
        fs::create_dir_all(dir)?;
        archive.extract(dir)?;
        Ok(())
    }

    fn open_archive(&self) -> Result<ZipArchive<BufReader<File>>> {
        let file = match File::open(&self.archive) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::not_found(&self.archive))
            }
            Err(e) => return Err(e.into()),
        };
        ZipArchive::new(BufReader::new(file)).map_err(|e| self.invalid(e.to_string()))
    }

    fn invalid(&self, message: String) -> Error {
        Error::InvalidContainer {
            path: self.archive.clone(),
            message,
        }
    }
}

impl Drop for ContainerManager {
    fn drop(&mut self) {
        self.release_scratch();
    }
}

fn partial_path(archive: &Path) -> PathBuf {
    let mut name = archive.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    archive.with_file_name(name)
}

fn write_archive(path: &Path, video: &Path, record: &Path) -> Result<()> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(path)?));

    for (name, source) in [(VIDEO_MEMBER, video), (RECORD_MEMBER, record)] {
        let mut input = BufReader::new(File::open(source)?);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);
        zip.start_file(name, options)?;
        io::copy(&mut input, &mut zip)?;
    }

    zip.finish()?.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{FieldValue, Labels};
    use crate::video::{FourCc, Frame, FrameSize, RawVideoWriter, VideoSink};

    const SIZE: FrameSize = FrameSize::new(2, 2);

    fn recording() -> Recording {
        let mut recording = Recording::new(Labels::new(["A", "B"]));
        recording.push(0, vec![FieldValue::Int(1), FieldValue::Int(2)]);
        recording.push(0, vec![FieldValue::Int(3), FieldValue::Int(4)]);
        recording.push(2, vec![FieldValue::Int(5), FieldValue::Int(6)]);
        recording
    }

    /// Write a three-frame video and the recording, then save them.
    fn saved_container(dir: &Path) -> ContainerManager {
        crate::logging::init_test_logging();
        let video = dir.join("~temp.mp4");
        let record = dir.join("~temp.json");
        let mut sink = RawVideoWriter::create(&video, FourCc::MP4V, 20, SIZE).unwrap();
        for shade in [0, 100, 200] {
            sink.write_frame(&Frame::solid(SIZE, [shade; 3])).unwrap();
        }
        Box::new(sink).close().unwrap();
        recording().write_json(&record).unwrap();

        let manager = ContainerManager::new(dir.join("run.tss"));
        manager.save(&video, &record, SaveOptions::default()).unwrap();
        manager
    }

    #[test]
    fn test_save_deletes_originals() {
        let dir = tempfile::tempdir().unwrap();
        let manager = saved_container(dir.path());

        assert!(manager.archive_path().is_file());
        assert!(!dir.path().join("~temp.mp4").exists());
        assert!(!dir.path().join("~temp.json").exists());
        assert!(!dir.path().join("run.tss.part").exists());
    }

    #[test]
    fn test_save_refuses_existing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let manager = saved_container(dir.path());

        let video = dir.path().join("v");
        let record = dir.path().join("r");
        fs::write(&video, b"v").unwrap();
        fs::write(&record, b"{}").unwrap();

        let err = manager
            .save(&video, &record, SaveOptions::default())
            .unwrap_err();
        assert!(err.is_already_exists());
        assert!(video.exists());

        let overwrite = SaveOptions {
            delete_originals: false,
            overwrite: true,
        };
        manager.save(&video, &record, overwrite).unwrap();
        assert!(video.exists());
    }

    #[test]
    fn test_save_missing_source_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ContainerManager::new(dir.path().join("run.tss"));
        let err = manager.save(
            &dir.path().join("missing.mp4"),
            &dir.path().join("missing.json"),
            SaveOptions::default(),
        );
        assert!(err.is_err());
        assert!(!manager.archive_path().exists());
        assert!(!dir.path().join("run.tss.part").exists());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = saved_container(dir.path());

        let out = dir.path().join("unpacked");
        manager.extract(&out, false).unwrap();
        assert_eq!(manager.extracted_dir(), Some(out.as_path()));
        assert_eq!(Recording::read_json(out.join(RECORD_MEMBER)).unwrap(), recording());
        assert!(out.join(VIDEO_MEMBER).is_file());
        assert_eq!(manager.load_recording().unwrap(), recording());
    }

    #[test]
    fn test_extract_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ContainerManager::new(dir.path().join("nope.tss"));
        let err = manager.extract(dir.path().join("out"), true).unwrap_err();
        assert!(err.is_not_found());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_extract_collision_leaves_directory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = saved_container(dir.path());

        let out = dir.path().join("unpacked");
        fs::create_dir(&out).unwrap();
        fs::write(out.join("keep.txt"), b"mine").unwrap();

        let err = manager.extract(&out, false).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(fs::read(out.join("keep.txt")).unwrap(), b"mine");
        assert!(manager.extracted_dir().is_none());
    }

    #[test]
    fn test_extract_replaces_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = saved_container(dir.path());

        let out = dir.path().join("unpacked");
        fs::create_dir(&out).unwrap();
        fs::write(out.join("stale.txt"), b"old").unwrap();

        manager.extract(&out, true).unwrap();
        assert!(!out.join("stale.txt").exists());
        assert!(out.join(RECORD_MEMBER).is_file());
    }

    #[test]
    fn test_export_table_cleans_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = saved_container(dir.path());
        let csv = dir.path().join("out.csv");

        let rows = manager
            .export_table(&csv, FrameRange::new(Some(0), Some(2)), false)
            .unwrap();
        assert_eq!(rows, 3);
        assert_eq!(fs::read_to_string(&csv).unwrap(), "A,B\n1,2\n3,4\n5,6\n");
        assert!(!manager.scratch_dir().exists());
        assert!(manager.extracted_dir().is_none());
    }

    #[test]
    fn test_export_table_collision() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = saved_container(dir.path());
        let csv = dir.path().join("out.csv");
        fs::write(&csv, "keep").unwrap();

        let err = manager
            .export_table(&csv, FrameRange::all(), false)
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(fs::read_to_string(&csv).unwrap(), "keep");
        assert!(!manager.scratch_dir().exists());

        manager.export_table(&csv, FrameRange::all(), true).unwrap();
        assert!(fs::read_to_string(&csv).unwrap().starts_with("A,B\n"));
    }

    #[test]
    fn test_export_reuses_explicit_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = saved_container(dir.path());
        let out = dir.path().join("unpacked");
        manager.extract(&out, false).unwrap();

        manager
            .export_table(dir.path().join("a.csv"), FrameRange::all(), false)
            .unwrap();
        manager
            .export_table(dir.path().join("b.csv"), FrameRange::all(), false)
            .unwrap();

        assert!(out.is_dir());
        assert!(!manager.scratch_dir().exists());

        manager.invalidate().unwrap();
        assert!(!out.exists());
        assert!(manager.extracted_dir().is_none());
    }

    #[test]
    fn test_occupied_scratch_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = saved_container(dir.path()).force_scratch(false);
        fs::create_dir(manager.scratch_dir()).unwrap();

        let err = manager
            .export_table(dir.path().join("out.csv"), FrameRange::all(), false)
            .unwrap_err();
        assert!(matches!(err, Error::ExtractFailed { .. }));
        assert!(!dir.path().join("out.csv").exists());
    }

    #[test]
    fn test_occupied_scratch_is_forced_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = saved_container(dir.path());
        fs::create_dir(manager.scratch_dir()).unwrap();

        manager
            .export_table(dir.path().join("out.csv"), FrameRange::all(), false)
            .unwrap();
        assert!(!manager.scratch_dir().exists());
    }

    #[test]
    fn test_export_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ContainerManager::new(dir.path().join("nope.tss"));
        let err = manager
            .export_table(dir.path().join("out.csv"), FrameRange::all(), false)
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!manager.scratch_dir().exists());
    }

    #[test]
    fn test_export_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = saved_container(dir.path());
        let out = dir.path().join("report");

        let summary = manager.export_report(&out, false).unwrap();
        assert_eq!(summary.document, out.join("run.md"));
        assert_eq!(summary.sections, 3);
        assert_eq!(summary.images, 2);
        assert!(out.join("img/frame2.png").is_file());

        let still = image::open(out.join("img/frame2.png")).unwrap().to_rgb8();
        assert_eq!(still.get_pixel(0, 0).0, [200, 200, 200]);
        assert!(!manager.scratch_dir().exists());

        let err = manager.export_report(&out, false).unwrap_err();
        assert!(err.is_already_exists());
        assert!(!manager.scratch_dir().exists());

        manager.export_report(&out, true).unwrap();
        assert!(out.join("run.md").is_file());
    }

    #[test]
    fn test_export_report_missing_archive_keeps_previous_report() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports");
        fs::create_dir_all(out.join("img")).unwrap();
        fs::write(out.join("img/other.png"), b"png").unwrap();
        fs::write(out.join("typo.md"), "# typo\n").unwrap();

        let mut manager = ContainerManager::new(dir.path().join("typo.tss"));
        for exists_ok in [false, true] {
            let err = manager.export_report(&out, exists_ok).unwrap_err();
            assert!(err.is_not_found());
        }
        assert!(out.join("img/other.png").is_file());
        assert!(out.join("typo.md").is_file());
        assert!(!manager.scratch_dir().exists());
    }

    #[test]
    fn test_invalid_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tss");
        fs::write(&path, b"not a zip").unwrap();

        let mut manager = ContainerManager::new(&path);
        assert!(matches!(
            manager.load_recording(),
            Err(Error::InvalidContainer { .. })
        ));
        let out = dir.path().join("out");
        assert!(matches!(
            manager.extract(&out, false),
            Err(Error::InvalidContainer { .. })
        ));
        assert!(!out.exists());
    }

    #[test]
    fn test_missing_member_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("half.tss");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file(RECORD_MEMBER, SimpleFileOptions::default())
            .unwrap();
        zip.write_all(br#"{"labels":[],"data":[]}"#).unwrap();
        zip.finish().unwrap();

        let mut manager = ContainerManager::new(&path);
        assert!(manager.load_recording().is_ok());
        let err = manager.extract(dir.path().join("out"), false).unwrap_err();
        assert!(matches!(err, Error::InvalidContainer { .. }));
    }

    #[test]
    fn test_title_is_file_stem() {
        assert_eq!(ContainerManager::new("/data/2024-05-01.tss").title(), "2024-05-01");
    }
}

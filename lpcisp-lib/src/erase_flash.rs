use crate::layout::SectorRange;
use crate::progress::{ProgressHelper, ProgressOperation, ProgressStatus};
use crate::session::{BlankCheck, IspSession};
use crate::transport::LineTransport;
use crate::Result;

/// 擦除与查空
pub struct EraseOps;

impl EraseOps {
    pub fn erase_sectors<T: LineTransport>(
        session: &mut IspSession<T>,
        progress: &ProgressHelper,
        range: SectorRange,
    ) -> Result<()> {
        session.layout().check_mutable(&range)?;
        let spinner = progress.create_spinner(ProgressOperation::Erase {
            start: range.start(),
            end: range.end(),
        });

        session.unlock()?;
        session.prepare_for_write(range)?;
        if let Err(e) = session.erase(range) {
            spinner.finish(ProgressStatus::Failed(e.to_string()));
            return Err(e);
        }

        spinner.finish(ProgressStatus::Success);
        Ok(())
    }

    pub fn blank_check<T: LineTransport>(
        session: &mut IspSession<T>,
        progress: &ProgressHelper,
        range: SectorRange,
    ) -> Result<BlankCheck> {
        let spinner = progress.create_spinner(ProgressOperation::BlankCheck {
            start: range.start(),
            end: range.end(),
        });
        let result = session.blank_check(range)?;
        let message = match &result {
            BlankCheck::Blank => format!("Sectors {} are blank", range),
            BlankCheck::BootRemapped { .. } => {
                format!("Sectors {} are blank (sector 0 shows the boot vectors)", range)
            }
            BlankCheck::NotBlank {
                sector,
                offset,
                value,
            } => format!(
                "Sector {} is not blank: offset 0x{:X} holds 0x{:08X}",
                sector, offset, value
            ),
        };
        spinner.finish_with_message(message);
        Ok(result)
    }
}

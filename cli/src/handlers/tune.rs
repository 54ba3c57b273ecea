use std::error::Error;

use comfy_table::{CellAlignment, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use console::Style;
use flashprefill::{DeviceCapability, KernelTuning, kernel::HeadDimSplit};

const HEAD_DIMS: [usize; 12] = [16, 32, 48, 64, 80, 96, 128, 192, 256, 512, 576, 1024];

pub fn handle_tune(
    capability: Option<DeviceCapability>,
    legacy_toolchain: bool,
) -> Result<(), Box<dyn Error>> {
    let tuning = KernelTuning::new(capability, legacy_toolchain);
    let title = match capability {
        Some(capability) => format!("Tile configurations for capability {capability}"),
        None => "Tile configurations without a capability (conservative)".to_string(),
    };
    println!("{}", Style::new().bold().apply_to(title));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Head dim", "Blocks", "Separate KV", "Bytes", "Shared KV", "Bytes"]);
    for head_dim in HEAD_DIMS {
        let split = HeadDimSplit::new(head_dim, head_dim);
        let separate = tuning.tile_configuration(split.block_dk, false);
        let shared = tuning.tile_configuration(split.block_dk, true);
        let blocks = if split.block_dk1 == 0 {
            split.block_dk.to_string()
        } else {
            format!("{}+{}", split.block_dk, split.block_dk1)
        };
        table.add_row(vec![
            head_dim.to_string(),
            blocks,
            separate.to_string(),
            separate.working_set_bytes(&split, false).to_string(),
            shared.to_string(),
            shared.working_set_bytes(&split, true).to_string(),
        ]);
    }
    for index in [0, 3, 5] {
        if let Some(column) = table.column_mut(index) {
            column.set_cell_alignment(CellAlignment::Right);
        }
    }
    println!("{table}");

    Ok(())
}

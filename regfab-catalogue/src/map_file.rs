//! C4 — MapFileParser: builds a [`NumericAddressedRegisterCatalogue`] from
//! the line-oriented text format in SPEC_FULL.md §4.3, including legacy and
//! new-style 2-D multiplexed composition.

use std::collections::HashMap;

use regfab_types::{LogicError, RegisterPath};

use crate::catalogue::{parse_int, NumericAddressedRegisterCatalogue};
use crate::register_info::{ChannelInfo, NumericType, RegisterAccess, RegisterInfo};

const LEGACY_MARKER: &str = "AREA_MULTIPLEXED_SEQUENCE_";
const LEGACY_SIBLING: &str = "SEQUENCE_";
const NEW_MARKER: &str = "MEM_MULTIPLEXED_";

/// Result of a successful parse: the populated catalogue plus any `@name
/// value` metadata lines.
#[derive(Debug, Default)]
pub struct ParsedMapFile {
    pub catalogue: NumericAddressedRegisterCatalogue,
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug)]
struct RawEntry {
    info: RegisterInfo,
    line: usize,
}

#[derive(Default)]
pub struct MapFileParser {
    source_name: String,
}

impl MapFileParser {
    pub fn new() -> Self {
        Self { source_name: "<map>".to_string() }
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    #[tracing::instrument(skip(self, text), fields(source = %self.source_name))]
    pub fn parse(&self, text: &str) -> Result<ParsedMapFile, LogicError> {
        let mut metadata = HashMap::new();
        let mut entries: Vec<RawEntry> = Vec::new();

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix('@') {
                let mut parts = rest.splitn(2, char::is_whitespace);
                let name = parts.next().unwrap_or_default().to_string();
                let value = parts.next().unwrap_or_default().trim().to_string();
                metadata.insert(name, value);
                continue;
            }
            let info = self.parse_register_line(line, line_no)?;
            entries.push(RawEntry { info, line: line_no });
        }

        let mut catalogue = NumericAddressedRegisterCatalogue::new();
        self.compose_multiplexed(&mut entries)?;
        for entry in entries {
            catalogue.add_register(entry.info);
        }
        if let Some(json) = metadata.get("DataConsistencyKeys") {
            self.apply_data_consistency_keys(&mut catalogue, json)?;
        }
        tracing::debug!(registers = catalogue.number_of_registers(), "map file parsed");
        Ok(ParsedMapFile { catalogue, metadata })
    }

    fn parse_register_line(&self, line: &str, line_no: usize) -> Result<RegisterInfo, LogicError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(self.err(line_no, "expected at least: path nElements address sizeInBytes"));
        }
        let path = RegisterPath::parse(fields[0], Some('.'));
        let n_elements: usize = fields[1]
            .parse()
            .map_err(|_| self.err(line_no, "nElements is not a valid integer"))?;
        let address = parse_int(fields[2]).ok_or_else(|| self.err(line_no, "address is not a valid integer"))?;
        let size_in_bytes = parse_int(fields[3]).ok_or_else(|| self.err(line_no, "sizeInBytes is not a valid integer"))?;
        let bar: u32 = match fields.get(4) {
            Some(s) => parse_int(s).ok_or_else(|| self.err(line_no, "bar is not a valid integer"))? as u32,
            None => 0,
        };
        let width: u8 = match fields.get(5) {
            Some(s) => {
                let w: u64 = parse_int(s).ok_or_else(|| self.err(line_no, "width is not a valid integer"))?;
                if w > 32 {
                    return Err(self.err(line_no, "width exceeds 32 bits"));
                }
                w as u8
            }
            None => 32,
        };
        let (data_type, n_fractional_bits) = match fields.get(6) {
            None => (NumericType::FixedPoint, 0i16),
            Some(&"IEEE754") => (NumericType::Ieee754, 0),
            Some(&"ASCII") => (NumericType::Ascii, 0),
            Some(s) => {
                let v = parse_signed(s).ok_or_else(|| self.err(line_no, "bitInterpretation is not a recognised token"))?;
                if !(-1024..=1023).contains(&v) {
                    return Err(self.err(line_no, "nFractionalBits out of range"));
                }
                (NumericType::FixedPoint, v as i16)
            }
        };
        let data_type = if width == 0 { NumericType::Void } else { data_type };
        let signed: bool = match fields.get(7) {
            Some(&"0") => false,
            Some(&"1") => true,
            None => true,
            Some(_) => return Err(self.err(line_no, "signedFlag must be 0 or 1")),
        };
        let (access, interrupt_id) = match fields.get(8) {
            None => (RegisterAccess::ReadWrite, Vec::new()),
            Some(&"RO") => (RegisterAccess::ReadOnly, Vec::new()),
            Some(&"RW") => (RegisterAccess::ReadWrite, Vec::new()),
            Some(&"WO") => (RegisterAccess::WriteOnly, Vec::new()),
            Some(s) => {
                if let Some(rest) = s.strip_prefix("INTERRUPT") {
                    let ids: Result<Vec<u32>, _> = rest
                        .split(':')
                        .filter(|s| !s.is_empty())
                        .map(|tok| parse_int(tok).map(|v| v as u32).ok_or(()))
                        .collect();
                    let ids = ids.map_err(|_| self.err(line_no, "malformed INTERRUPT id chain"))?;
                    if ids.is_empty() {
                        return Err(self.err(line_no, "INTERRUPT requires at least one id"));
                    }
                    (RegisterAccess::Interrupt, ids)
                } else {
                    return Err(self.err(line_no, "unknown access token"));
                }
            }
        };
        if data_type == NumericType::Void && access != RegisterAccess::Interrupt {
            return Err(self.err(line_no, "VOID register must use INTERRUPT access"));
        }
        RegisterInfo::new_one_d(path, n_elements, address, bar, width, data_type, n_fractional_bits, signed, access, interrupt_id)
            .map_err(|e| self.err(line_no, &e.to_string()))
    }

    fn err(&self, line: usize, message: &str) -> LogicError {
        LogicError::MapFileParse { path: self.source_name.clone(), line, message: message.to_string() }
    }

    /// `@DataConsistencyKeys` carries a JSON object mapping register path ->
    /// realm name (SPEC_FULL.md §6); every key must already name a register
    /// in this map file.
    fn apply_data_consistency_keys(&self, catalogue: &mut NumericAddressedRegisterCatalogue, json: &str) -> Result<(), LogicError> {
        let parsed: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json).map_err(|e| LogicError::MapFileParse {
            path: self.source_name.clone(),
            line: 0,
            message: format!("DataConsistencyKeys is not a valid JSON object: {e}"),
        })?;
        for (path, realm) in parsed {
            let realm_name = realm.as_str().ok_or_else(|| LogicError::MapFileParse {
                path: self.source_name.clone(),
                line: 0,
                message: format!("DataConsistencyKeys['{path}'] must be a JSON string"),
            })?;
            if !catalogue.has_register(&RegisterPath::parse(&path, Some('.'))) {
                return Err(LogicError::MapFileParse {
                    path: self.source_name.clone(),
                    line: 0,
                    message: format!("DataConsistencyKeys names unknown register '{path}'"),
                });
            }
            catalogue.add_data_consistency_realm(&path, realm_name);
        }
        Ok(())
    }

    /// Detects and folds legacy (`AREA_MULTIPLEXED_SEQUENCE_<base>` +
    /// `SEQUENCE_<base>_<k>`) and new-style (`MEM_MULTIPLEXED_<base>` +
    /// `<base>/...`) composites into single 2-D registers, removing the
    /// absorbed sibling/descendant entries.
    fn compose_multiplexed(&self, entries: &mut Vec<RawEntry>) -> Result<(), LogicError> {
        let mut composites: Vec<(usize, RegisterInfo)> = Vec::new();
        let mut raw_views: Vec<RawEntry> = Vec::new();
        let mut absorbed: Vec<usize> = Vec::new();

        for (i, entry) in entries.iter().enumerate() {
            let last = entry.info.path.components().last().cloned().unwrap_or_default();
            if let Some(base) = last.strip_prefix(LEGACY_MARKER) {
                let parent = entry.info.path.parent().unwrap_or_else(RegisterPath::root);
                let prefix = format!("{LEGACY_SIBLING}{base}_");
                let mut siblings: Vec<(u32, usize)> = Vec::new();
                for (j, candidate) in entries.iter().enumerate() {
                    let cand_parent = candidate.info.path.parent().unwrap_or_else(RegisterPath::root);
                    if cand_parent != parent {
                        continue;
                    }
                    let cand_last = candidate.info.path.components().last().cloned().unwrap_or_default();
                    if let Some(k) = cand_last.strip_prefix(&prefix) {
                        if let Ok(k) = k.parse::<u32>() {
                            siblings.push((k, j));
                        }
                    }
                }
                if siblings.is_empty() {
                    return Err(self.err(entry.line, "multiplexed sequence has no sibling channels"));
                }
                siblings.sort_by_key(|(k, _)| *k);
                let sibling_indices: Vec<usize> = siblings.iter().map(|(_, j)| *j).collect();
                let channel_entries: Vec<&RawEntry> = sibling_indices.iter().map(|&j| &entries[j]).collect();
                let composite_path = parent.push(base);
                let (composite, raw_view) = self.build_composite(entry, &composite_path, &channel_entries)?;
                composites.push((i, composite));
                raw_views.push(RawEntry { info: raw_view, line: entry.line });
                absorbed.extend(sibling_indices);
            } else if let Some(base) = last.strip_prefix(NEW_MARKER) {
                let parent = entry.info.path.parent().unwrap_or_else(RegisterPath::root);
                let base_path = parent.push(base);
                let mut descendants: Vec<(u64, usize)> = Vec::new();
                for (j, candidate) in entries.iter().enumerate() {
                    if j != i && candidate.info.path.starts_with(&base_path) {
                        descendants.push((candidate.info.address, j));
                    }
                }
                if descendants.is_empty() {
                    return Err(self.err(entry.line, "multiplexed memory region has no descendant channels"));
                }
                descendants.sort_by_key(|(addr, _)| *addr);
                let descendant_indices: Vec<usize> = descendants.iter().map(|(_, j)| *j).collect();
                let channel_entries: Vec<&RawEntry> = descendant_indices.iter().map(|&j| &entries[j]).collect();
                let (composite, raw_view) = self.build_composite(entry, &base_path, &channel_entries)?;
                composites.push((i, composite));
                raw_views.push(RawEntry { info: raw_view, line: entry.line });
                absorbed.extend(descendant_indices);
            }
        }

        // Replace marker entries with their composite, in reverse index order
        // so later removals don't shift earlier indices; then drop absorbed
        // sibling/descendant entries.
        absorbed.sort_unstable();
        absorbed.dedup();
        for (i, composite) in composites {
            entries[i].info = composite;
        }
        for &j in absorbed.iter().rev() {
            entries.remove(j);
        }
        entries.extend(raw_views);
        Ok(())
    }

    fn build_composite(
        &self,
        marker: &RawEntry,
        composite_path: &RegisterPath,
        channel_entries: &[&RawEntry],
    ) -> Result<(RegisterInfo, RegisterInfo), LogicError> {
        let composite_address = channel_entries.iter().map(|e| e.info.address).min().unwrap_or(marker.info.address);
        let mut per_channel: Vec<(u32, u64, &RawEntry)> = Vec::new();
        for entry in channel_entries {
            if entry.info.address < composite_address {
                return Err(self.err(entry.line, "channel address below composite address"));
            }
            let n_bytes = entry.info.size_in_bytes;
            if ![1, 2, 4].contains(&n_bytes) {
                return Err(self.err(entry.line, "channel size must be 1, 2 or 4 bytes"));
            }
            let bit_offset = ((entry.info.address - composite_address) * 8) as u32;
            per_channel.push((bit_offset, n_bytes, entry));
        }
        per_channel.sort_by_key(|(offset, _, _)| *offset);
        let bytes_per_block: u64 = per_channel.iter().map(|(_, n, _)| n).sum();
        if bytes_per_block == 0 {
            return Err(self.err(marker.line, "multiplexed composite has zero bytes per block"));
        }
        let n_blocks = (marker.info.size_in_bytes / bytes_per_block) as usize;
        let element_pitch_bits = (bytes_per_block * 8) as u32;

        let mut channels = Vec::with_capacity(per_channel.len());
        for (idx, (bit_offset, _, entry)) in per_channel.iter().enumerate() {
            let next_offset =
                per_channel.get(idx + 1).map(|(o, _, _)| *o).unwrap_or(element_pitch_bits);
            let gap = next_offset.saturating_sub(*bit_offset);
            let declared_width = entry.info.channels[0].width as u32;
            let effective_width = declared_width.min(gap);
            channels.push(ChannelInfo {
                bit_offset: *bit_offset,
                data_type: entry.info.channels[0].data_type,
                width: effective_width as u8,
                n_fractional_bits: entry.info.channels[0].n_fractional_bits,
                signed: entry.info.channels[0].signed,
            });
        }

        let composite = RegisterInfo::new_two_d(
            composite_path.clone(),
            n_blocks,
            composite_address,
            marker.info.bar,
            element_pitch_bits,
            channels,
            marker.info.access,
            marker.info.interrupt_id.clone(),
        )
        .map_err(|e| self.err(marker.line, &e.to_string()))?;

        // C4 MULTIPLEXED_RAW: a flat 1-D 32-bit view over the same byte
        // range, alongside the 2-D composite (MapFileParser::make2DRegisterInfos).
        if marker.info.size_in_bytes % 4 != 0 {
            return Err(self.err(marker.line, "multiplexed region size is not a multiple of 4 bytes"));
        }
        let composite_name = composite_path.components().last().cloned().unwrap_or_default();
        let raw_path = composite_path
            .parent()
            .unwrap_or_else(RegisterPath::root)
            .push(&format!("{composite_name}.MULTIPLEXED_RAW"));
        let raw_view = RegisterInfo::new_one_d(
            raw_path,
            (marker.info.size_in_bytes / 4) as usize,
            composite_address,
            marker.info.bar,
            32,
            NumericType::FixedPoint,
            0,
            true,
            marker.info.access,
            marker.info.interrupt_id.clone(),
        )
        .map_err(|e| self.err(marker.line, &e.to_string()))?;

        Ok((composite, raw_view))
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn parse_signed(token: &str) -> Option<i64> {
    if let Some(rest) = token.strip_prefix('-') {
        parse_int(rest).map(|v| -(v as i64))
    } else {
        parse_int(token).map(|v| v as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_register() {
        let parser = MapFileParser::new();
        let parsed = parser.parse("FEATURE.AREA1 5 0 20 0 32 0 1 RW\n").unwrap();
        let info = parsed.catalogue.get_register(&RegisterPath::from("/FEATURE/AREA1")).unwrap();
        assert_eq!(info.n_elements, 5);
        assert_eq!(info.size_in_bytes, 20);
        assert_eq!(info.access, RegisterAccess::ReadWrite);
    }

    #[test]
    fn comments_and_metadata() {
        let parser = MapFileParser::new();
        let parsed = parser
            .parse("@firmware 1.2.3\n# just a comment\nWORD_X 1 0 4 0 32 0 1 RO # trailing comment\n")
            .unwrap();
        assert_eq!(parsed.metadata.get("firmware").unwrap(), "1.2.3");
        assert!(parsed.catalogue.has_register(&RegisterPath::from("/WORD_X")));
    }

    #[test]
    fn interrupt_access() {
        let parser = MapFileParser::new();
        let parsed = parser.parse("WORD_IRQ 1 0 4 0 32 0 1 INTERRUPT6\n").unwrap();
        let info = parsed.catalogue.get_register(&RegisterPath::from("/WORD_IRQ")).unwrap();
        assert_eq!(info.access, RegisterAccess::Interrupt);
        assert_eq!(info.interrupt_id, vec![6]);
    }

    #[test]
    fn chained_interrupt_ids() {
        let parser = MapFileParser::new();
        let parsed = parser.parse("WORD_IRQ 1 0 4 0 32 0 1 INTERRUPT1:2\n").unwrap();
        let info = parsed.catalogue.get_register(&RegisterPath::from("/WORD_IRQ")).unwrap();
        assert_eq!(info.interrupt_id, vec![1, 2]);
    }

    #[test]
    fn void_requires_interrupt_access() {
        let parser = MapFileParser::new();
        let err = parser.parse("WORD_VOID 1 0 0 0 0 0 1 RO\n").unwrap_err();
        assert!(err.to_string().contains("VOID"));
    }

    #[test]
    fn unknown_access_token_is_rejected() {
        let parser = MapFileParser::new();
        assert!(parser.parse("WORD_X 1 0 4 0 32 0 1 XX\n").is_err());
    }

    #[test]
    fn width_over_32_is_rejected() {
        let parser = MapFileParser::new();
        assert!(parser.parse("WORD_X 1 0 4 0 48\n").is_err());
    }

    #[test]
    fn ieee754_and_ascii_tokens() {
        let parser = MapFileParser::new();
        let parsed = parser
            .parse("WORD_FLOAT 1 0 4 0 32 IEEE754\nSTRING_NAME 4 4 16 0 32 ASCII\n")
            .unwrap();
        let f = parsed.catalogue.get_register(&RegisterPath::from("/WORD_FLOAT")).unwrap();
        assert_eq!(f.channels[0].data_type, NumericType::Ieee754);
        let s = parsed.catalogue.get_register(&RegisterPath::from("/STRING_NAME")).unwrap();
        assert_eq!(s.channels[0].data_type, NumericType::Ascii);
    }

    #[test]
    fn legacy_multiplexed_sequence() {
        let text = "\
AREA_MULTIPLEXED_SEQUENCE_DATA 10 0 40 0 32 0 1 RW
SEQUENCE_DATA_0 1 0 4 0 32 0 1 RW
SEQUENCE_DATA_1 1 4 4 0 32 0 1 RW
SEQUENCE_DATA_2 1 8 4 0 32 0 1 RW
";
        let parser = MapFileParser::new();
        let parsed = parser.parse(text).unwrap();
        let info = parsed.catalogue.get_register(&RegisterPath::from("/DATA")).unwrap();
        assert_eq!(info.n_channels, 3);
        assert!(info.channels.windows(2).all(|w| w[0].bit_offset < w[1].bit_offset));
        assert_eq!(info.n_elements, 10 * 4 / 12); // sizeInBytes / bytesPerBlock
        assert!(!parsed.catalogue.has_register(&RegisterPath::from("/SEQUENCE_DATA_0")));

        let raw = parsed.catalogue.get_register(&RegisterPath::from("/DATA.MULTIPLEXED_RAW")).unwrap();
        assert_eq!(raw.n_channels, 1);
        assert_eq!(raw.channels[0].width, 32);
        assert_eq!(raw.n_elements, info.size_in_bytes as usize / 4);
        assert_eq!(raw.address, info.address);
    }

    #[test]
    fn new_style_multiplexed_region() {
        let text = "\
MEM_MULTIPLEXED_CHAN 4 0 12 0 32 0 1 RW
CHAN/A 1 0 4 0 32 0 1 RW
CHAN/B 1 4 4 0 32 0 1 RW
CHAN/C 1 8 4 0 32 0 1 RW
";
        let parser = MapFileParser::new();
        let parsed = parser.parse(text).unwrap();
        let info = parsed.catalogue.get_register(&RegisterPath::from("/CHAN")).unwrap();
        assert_eq!(info.n_channels, 3);
        assert_eq!(info.channels[0].bit_offset, 0);
        assert_eq!(info.channels[1].bit_offset, 32);
        assert_eq!(info.channels[2].bit_offset, 64);

        assert!(parsed.catalogue.has_register(&RegisterPath::from("/CHAN.MULTIPLEXED_RAW")));
    }

    #[test]
    fn data_consistency_keys_are_applied() {
        let parser = MapFileParser::new();
        let text = "WORD_X 1 0 4 0 32 0 1 RW\n@DataConsistencyKeys {\"WORD_X\": \"beam-current\"}\n";
        let parsed = parser.parse(text).unwrap();
        let path = RegisterPath::from("/WORD_X");
        assert_eq!(parsed.catalogue.data_consistency_realm_for(&path), Some("beam-current"));
    }

    #[test]
    fn data_consistency_keys_reject_unknown_register() {
        let parser = MapFileParser::new();
        let text = "WORD_X 1 0 4 0 32 0 1 RW\n@DataConsistencyKeys {\"NOPE\": \"beam-current\"}\n";
        assert!(parser.parse(text).is_err());
    }

    #[test]
    fn legacy_sequence_without_siblings_fails() {
        let parser = MapFileParser::new();
        let err = parser.parse("AREA_MULTIPLEXED_SEQUENCE_LONE 1 0 4 0 32 0 1 RW\n").unwrap_err();
        assert!(err.to_string().contains("no sibling"));
    }
}

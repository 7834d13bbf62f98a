//! End-to-end tests against synthetic LoongArch64 ELF64 files, built by hand since no real
//! LoongArch binaries are available in this environment (the teacher's own integration test
//! copies real system libraries instead; that isn't an option for this target).

use std::io::Write;

use shengloong::hash::bfd_elf_hash;
use shengloong::opts::{Config, Opts};

const EM_LOONGARCH: u16 = 258;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_DYN: u16 = 3;
const SHT_STRTAB: u32 = 3;
const SHT_DYNSYM: u32 = 11;
const SHT_GNU_VERNEED: u32 = 0x6ffffffe;
const SHT_PROGBITS: u32 = 1;

struct SectionSpec {
    name: &'static str,
    sh_type: u32,
    sh_flags: u64,
    sh_link: u32,
    sh_info: u32,
    sh_addralign: u64,
    sh_entsize: u64,
    data: Vec<u8>,
}

fn section(
    name: &'static str,
    sh_type: u32,
    sh_flags: u64,
    sh_link: u32,
    sh_info: u32,
    sh_addralign: u64,
    sh_entsize: u64,
    data: Vec<u8>,
) -> SectionSpec {
    SectionSpec {
        name,
        sh_type,
        sh_flags,
        sh_link,
        sh_info,
        sh_addralign,
        sh_entsize,
        data,
    }
}

/// Assembles a minimal ELF64 file: a header, the given sections in order, a trailing
/// `.shstrtab`, and a section header table. No program headers.
fn build_elf(machine: u16, sections: Vec<SectionSpec>) -> Vec<u8> {
    let mut shstrtab = vec![0u8];
    let mut name_offsets = Vec::with_capacity(sections.len() + 1);

    for s in &sections {
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(s.name.as_bytes());
        shstrtab.push(0);
    }
    let shstrtab_name_offset = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab");
    shstrtab.push(0);

    let mut raw = vec![0u8; 64]; // ehdr placeholder
    let mut offsets = Vec::with_capacity(sections.len());

    for s in &sections {
        offsets.push(raw.len() as u64);
        raw.extend_from_slice(&s.data);
    }
    let shstrtab_offset = raw.len() as u64;
    raw.extend_from_slice(&shstrtab);

    let shoff = raw.len() as u64;
    let shnum = sections.len() as u16 + 2; // null + given + shstrtab
    let shstrndx = sections.len() as u16 + 1;

    // null section header
    raw.extend_from_slice(&[0u8; 64]);

    for (i, s) in sections.iter().enumerate() {
        push_shdr(
            &mut raw,
            name_offsets[i],
            s.sh_type,
            s.sh_flags,
            offsets[i],
            s.data.len() as u64,
            s.sh_link,
            s.sh_info,
            s.sh_addralign,
            s.sh_entsize,
        );
    }

    push_shdr(
        &mut raw,
        shstrtab_name_offset,
        SHT_STRTAB,
        0,
        shstrtab_offset,
        shstrtab.len() as u64,
        0,
        0,
        1,
        0,
    );

    // e_ident
    raw[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    raw[4] = ELFCLASS64;
    raw[5] = ELFDATA2LSB;
    raw[6] = 1; // EV_CURRENT
    raw[16..18].copy_from_slice(&ET_DYN.to_le_bytes());
    raw[18..20].copy_from_slice(&machine.to_le_bytes());
    raw[20..24].copy_from_slice(&1u32.to_le_bytes()); // e_version
    raw[40..48].copy_from_slice(&shoff.to_le_bytes());
    raw[52..54].copy_from_slice(&64u16.to_le_bytes()); // e_ehsize
    raw[58..60].copy_from_slice(&64u16.to_le_bytes()); // e_shentsize
    raw[60..62].copy_from_slice(&shnum.to_le_bytes());
    raw[62..64].copy_from_slice(&shstrndx.to_le_bytes());

    raw
}

#[allow(clippy::too_many_arguments)]
fn push_shdr(
    raw: &mut Vec<u8>,
    sh_name: u32,
    sh_type: u32,
    sh_flags: u64,
    sh_offset: u64,
    sh_size: u64,
    sh_link: u32,
    sh_info: u32,
    sh_addralign: u64,
    sh_entsize: u64,
) {
    raw.extend_from_slice(&sh_name.to_le_bytes());
    raw.extend_from_slice(&sh_type.to_le_bytes());
    raw.extend_from_slice(&sh_flags.to_le_bytes());
    raw.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
    raw.extend_from_slice(&sh_offset.to_le_bytes());
    raw.extend_from_slice(&sh_size.to_le_bytes());
    raw.extend_from_slice(&sh_link.to_le_bytes());
    raw.extend_from_slice(&sh_info.to_le_bytes());
    raw.extend_from_slice(&sh_addralign.to_le_bytes());
    raw.extend_from_slice(&sh_entsize.to_le_bytes());
}

/// A `.dynstr` holding `libc.so.6` and one version tag, plus a one-entry `.gnu.version_r`
/// naming that tag with its BFD/ELF hash.
fn elf_with_one_verneed(machine: u16, ver_tag: &str) -> Vec<u8> {
    let mut dynstr = vec![0u8];
    dynstr.extend_from_slice(b"libc.so.6\0");
    let name_off = dynstr.len() as u32;
    dynstr.extend_from_slice(ver_tag.as_bytes());
    dynstr.push(0);

    let dynsym = vec![0u8; 24]; // one null entry

    let mut version_r = Vec::new();
    version_r.extend_from_slice(&1u16.to_le_bytes()); // vn_version
    version_r.extend_from_slice(&1u16.to_le_bytes()); // vn_cnt
    version_r.extend_from_slice(&1u32.to_le_bytes()); // vn_file
    version_r.extend_from_slice(&16u32.to_le_bytes()); // vn_aux
    version_r.extend_from_slice(&0u32.to_le_bytes()); // vn_next
    version_r.extend_from_slice(&bfd_elf_hash(ver_tag).to_le_bytes()); // vna_hash
    version_r.extend_from_slice(&0u16.to_le_bytes()); // vna_flags
    version_r.extend_from_slice(&0u16.to_le_bytes()); // vna_other
    version_r.extend_from_slice(&name_off.to_le_bytes()); // vna_name
    version_r.extend_from_slice(&0u32.to_le_bytes()); // vna_next

    let text = vec![0u8; 4];

    build_elf(
        machine,
        vec![
            section(".dynstr", SHT_STRTAB, 0, 0, 0, 1, 0, dynstr),
            section(".dynsym", SHT_DYNSYM, 0, 1, 1, 8, 24, dynsym),
            section(
                ".gnu.version_r",
                SHT_GNU_VERNEED,
                0,
                1,
                1,
                4,
                0,
                version_r,
            ),
            section(".text", SHT_PROGBITS, 0x6, 0, 0, 4, 0, text),
        ],
    )
}

fn write_temp(name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "shengloong-migration-test-{:?}-{}",
        std::thread::current().id(),
        name
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("sample.so");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(bytes).unwrap();
    path
}

fn config(from_ver: &str, to_ver: &str) -> Config {
    Config::from_opts(&Opts {
        roots: vec![],
        verbose: false,
        dry_run: false,
        from_ver: from_ver.to_string(),
        to_ver: to_ver.to_string(),
        check_syscall_abi: false,
    })
    .unwrap()
}

#[test]
fn migrates_verneed_tag_in_place() {
    let raw = elf_with_one_verneed(EM_LOONGARCH, "GLIBC_2.35");
    let path = write_temp("migrate", &raw);
    let cfg = config("GLIBC_2.35", "GLIBC_2.36");

    let outcome = shengloong::migrate::migrate_file(&path, &cfg).unwrap();
    assert!(matches!(
        outcome,
        shengloong::migrate::Outcome::Processed { dirty: true }
    ));

    let patched = std::fs::read(&path).unwrap();
    assert!(patched.windows(10).any(|w| w == b"GLIBC_2.36"));
    assert!(!patched.windows(10).any(|w| w == b"GLIBC_2.35"));

    // The only thing that changed is the tag text and the hash; total length is the same.
    assert_eq!(patched.len(), raw.len());
}

#[test]
fn second_run_is_a_no_op() {
    let raw = elf_with_one_verneed(EM_LOONGARCH, "GLIBC_2.35");
    let path = write_temp("idempotent", &raw);
    let cfg = config("GLIBC_2.35", "GLIBC_2.36");

    shengloong::migrate::migrate_file(&path, &cfg).unwrap();
    let once = std::fs::read(&path).unwrap();

    let outcome = shengloong::migrate::migrate_file(&path, &cfg).unwrap();
    assert!(matches!(
        outcome,
        shengloong::migrate::Outcome::Processed { dirty: false }
    ));

    let twice = std::fs::read(&path).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn round_trip_restores_original_bytes() {
    let raw = elf_with_one_verneed(EM_LOONGARCH, "GLIBC_2.35");
    let path = write_temp("roundtrip", &raw);

    shengloong::migrate::migrate_file(&path, &config("GLIBC_2.35", "GLIBC_2.36")).unwrap();
    shengloong::migrate::migrate_file(&path, &config("GLIBC_2.36", "GLIBC_2.35")).unwrap();

    let restored = std::fs::read(&path).unwrap();
    assert_eq!(restored, raw);
}

#[test]
fn non_loongarch_machine_is_never_mutated() {
    let raw = elf_with_one_verneed(0x3e /* EM_X86_64 */, "GLIBC_2.35");
    let path = write_temp("wrong-machine", &raw);

    let outcome =
        shengloong::migrate::migrate_file(&path, &config("GLIBC_2.35", "GLIBC_2.36")).unwrap();
    assert!(matches!(
        outcome,
        shengloong::migrate::Outcome::Skipped { .. }
    ));

    let untouched = std::fs::read(&path).unwrap();
    assert_eq!(untouched, raw);
}

#[test]
fn check_syscall_abi_mode_never_writes() {
    let mut raw_words = vec![0u32; 4];
    // ori $a7, $zero, 80 ; syscall 0
    raw_words[1] = 0x0380_0000 | (80u32 << 10) | 11;
    raw_words[2] = 0x002b_0000;
    let text: Vec<u8> = raw_words.iter().flat_map(|w| w.to_le_bytes()).collect();

    let dynstr = vec![0u8];
    let elf_bytes = build_elf(
        EM_LOONGARCH,
        vec![
            section(".dynstr", SHT_STRTAB, 0, 0, 0, 1, 0, dynstr),
            section(".text", SHT_PROGBITS, 0x6, 0, 0, 4, 0, text),
        ],
    );
    let path = write_temp("syscall-abi", &elf_bytes);

    let mut opts = Opts {
        roots: vec![],
        verbose: false,
        dry_run: false,
        from_ver: "GLIBC_2.35".to_string(),
        to_ver: "GLIBC_2.36".to_string(),
        check_syscall_abi: true,
    };
    opts.check_syscall_abi = true;
    let cfg = Config::from_opts(&opts).unwrap();
    assert!(cfg.dry_run);

    let outcome = shengloong::migrate::migrate_file(&path, &cfg).unwrap();
    let hits = match outcome {
        shengloong::migrate::Outcome::SyscallHits(hits) => hits,
        _ => panic!("expected syscall-hit outcome"),
    };
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "fstat");

    let untouched = std::fs::read(&path).unwrap();
    assert_eq!(untouched, elf_bytes);
}

use bincode::{Decode, Encode};
use retrocore_proc_macros::{FakeDecode, FakeEncode, PartialClone};

#[derive(Debug, Clone, Default, PartialEq, Eq, FakeEncode, FakeDecode)]
struct RomBytes(Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, PartialClone)]
struct Cartridge {
    #[partial_clone(default)]
    rom: RomBytes,
    ram: Vec<u8>,
    bank: u8,
}

#[test]
fn fake_encode_skips_rom_bytes() {
    let cartridge =
        Cartridge { rom: RomBytes(vec![1, 2, 3, 4]), ram: vec![5, 6], bank: 7 };

    let config = bincode::config::standard();
    let encoded = bincode::encode_to_vec(&cartridge, config).unwrap();
    let (decoded, _) = bincode::decode_from_slice::<Cartridge, _>(&encoded, config).unwrap();

    assert_eq!(decoded.rom, RomBytes::default());
    assert_eq!(decoded.ram, vec![5, 6]);
    assert_eq!(decoded.bank, 7);
}

#[test]
fn partial_clone_defaults_rom_fields() {
    let cartridge =
        Cartridge { rom: RomBytes(vec![1, 2, 3, 4]), ram: vec![5, 6], bank: 7 };

    let cloned = retrocore_common::frontend::PartialClone::partial_clone(&cartridge);

    assert_eq!(cloned.rom, RomBytes::default());
    assert_eq!(cloned.ram, cartridge.ram);
    assert_eq!(cloned.bank, cartridge.bank);
}

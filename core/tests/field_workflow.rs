use formula_core::calc::{CalcStack, FieldQuantity, FieldValue, IntegrationKind, StackMachine};
use formula_core::naming::increment_name;
use formula_core::property::{Setup, SetupKind};
use formula_core::units::UnitTable;
use formula_core::variables::{Evaluator, Expression, MemoryBackend, VariableStore};
use formula_core::FormulaError;

/// Parametric dimensions drive the measure of the integration volume.
#[test]
fn test_parametric_energy_integral() -> Result<(), FormulaError> {
    let units = UnitTable::standard();
    let mut store = VariableStore::new(MemoryBackend::new());

    let w = store.set("w", "2mm")?;
    let h = store.set("h", "500um")?;
    let l = store.set("l", &(&w * 3))?;
    let volume = store.set("volume", &(&w * &h * &l))?;
    assert_eq!(volume.as_str(), "volume");
    assert_eq!(store.get_raw("volume")?, "w * h * l");

    let evaluator = Evaluator::new(&store, &units);
    // Every operand resolves in the requested unit.
    let box_volume = evaluator.evaluate("volume", "mm")?;
    assert!((box_volume - 6.0).abs() < 1e-10);
    let side_mm = evaluator.evaluate("l", "mm")?;
    assert!((side_mm - 6.0).abs() < 1e-10);

    let mut vm = StackMachine::with_setup("Setup1");
    vm.define_field(FieldQuantity::Mag_E.name(), 1, FieldValue::real(2.0));
    vm.define_entity(IntegrationKind::Vol, "substrate", side_mm);

    let energy = (CalcStack::field(FieldQuantity::Mag_E).pow(2.0) * 0.5).integrate_vol("substrate");
    let saved = energy.save_as(&mut vm, "U_E")?;
    let value = (saved * 2.0).evaluate(&mut vm, 1, 0)?;
    assert!((value - 24.0).abs() < 1e-10);
    Ok(())
}

#[test]
fn test_expression_algebra_round_trips_through_store() -> Result<(), FormulaError> {
    let units = UnitTable::standard();
    let mut store = VariableStore::new(MemoryBackend::new());

    let f = store.set("f0", "5GHz")?;
    let half = Expression::parse("f0 / 2")?;
    assert_eq!(half.to_string(), (&f / 2).to_string());

    let name = increment_name("band", &store.names()?);
    store.set(&name, &(-half + &f))?;
    let centre = Evaluator::new(&store, &units).evaluate("band1", "GHz")?;
    assert!((centre - 2.5).abs() < 1e-10);
    Ok(())
}

#[test]
fn test_eigenmode_setup_naming() {
    let setup = Setup::new("Eig1", SetupKind::Eigenmode);
    let mut vm = StackMachine::new();
    vm.add_setup(&setup.name);
    vm.define_field(FieldQuantity::ComplexMag_H.name(), 3, FieldValue::real(1.5));

    let abs_h = CalcStack::field(FieldQuantity::ComplexMag_H).abs();
    let value = abs_h.evaluate(&mut vm, 3, 30).unwrap();
    assert!((value - 1.5).abs() < 1e-10);
    assert_eq!(setup.solution_name(), "Eig1 : LastAdaptive");
}
